mod concurrency_tests;
mod pipeline_tests;
mod test_utils;
