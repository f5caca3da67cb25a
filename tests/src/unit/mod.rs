mod auth_flow_tests;
mod session_file_tests;
mod support;
