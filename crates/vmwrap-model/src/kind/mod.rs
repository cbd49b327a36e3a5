mod backend;
pub use backend::BackendKind;
