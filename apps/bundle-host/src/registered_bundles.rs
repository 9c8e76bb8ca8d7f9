// Links every bundle crate so its `register_bundle!` entry reaches the catalog.
// Add a line here when a new bundle crate is added to the workspace.
#![allow(unused_imports)]

use greeter_client as _;
use greeter_provider as _;
use hello_world as _;
