mod events_test;
mod prompt_test;
