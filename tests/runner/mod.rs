mod args_test;
mod fake;
mod interactive_test;
