pub mod function_hook;
