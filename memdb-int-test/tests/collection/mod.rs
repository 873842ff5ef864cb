mod escape_test;
mod index_test;
