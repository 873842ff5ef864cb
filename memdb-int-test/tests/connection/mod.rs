mod auto_connection_test;
mod event_test;
