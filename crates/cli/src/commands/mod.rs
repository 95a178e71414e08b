pub mod logs;
pub mod mcp;
pub mod run;
pub mod validate;
