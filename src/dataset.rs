pub mod annotation;
pub mod atomic;
pub mod class_table;
pub mod common_structs;
pub mod manifest;
pub mod path_rewriter;
pub mod split;
pub mod split_assembler;
