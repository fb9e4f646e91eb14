mod common;
mod dispatch_tests;
mod retry_tests;
mod store_tests;
mod topic_tests;
