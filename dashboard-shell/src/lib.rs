pub mod config;
pub mod tree;

pub use config::ShellConfig;
pub use tree::{default_route_tree, load_route_tree};
