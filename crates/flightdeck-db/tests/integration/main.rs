mod common;
mod posting_tests;
mod source_tests;
