mod code_gen;
mod doc_search;
mod framework;
mod supervisor;
mod syntax_validator;

pub use code_gen::CodeGenAgent;
pub use doc_search::{DocumentationSearchAgent, SearchError};
pub use framework::detect_framework;
pub use supervisor::{Classification, SupervisorAgent};
pub use syntax_validator::SyntaxValidator;
