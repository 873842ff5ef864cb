mod concurrency_test;
mod isolation_test;
mod rollback_test;
