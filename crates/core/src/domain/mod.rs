pub mod plan;
pub mod request;
pub mod retrieval;
pub mod run;
pub mod validation;
