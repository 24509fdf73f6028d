pub mod progressive;

pub use progressive::ProgressiveLoader;
