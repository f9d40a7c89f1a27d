pub mod document_tests;
pub mod limit_tests;
pub mod presence_tests;
