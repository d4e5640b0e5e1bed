mod bindings;
mod calls;
mod common;
mod document;
