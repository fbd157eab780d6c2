mod common;
mod standalone;
