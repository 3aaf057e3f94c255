//! Tool implementations, one per file.

pub mod editor;
pub mod read_components;
pub mod submodules;

pub use editor::StrReplaceEditorTool;
pub use read_components::ReadComponentsTool;
pub use submodules::{
    generator_handle, GenerateSubmodulesTool, GeneratorHandle, SubmoduleGenerator,
};
