pub mod build;
pub mod build_path;
pub mod completion;
pub mod console;
pub mod info;
pub mod methods;
pub mod resolve;
