pub mod cmds;
pub mod codegen;
pub mod descriptor;
pub mod layout;
pub mod minitable;
