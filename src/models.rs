//! These models represent the objects passed around by the agent
//!
//! There are several related formats we need to interact with:
//! - the neutral session format kept in conversation memory
//! - openai messages/tools, sent from the agent to the LLM
//! - anthropic messages/tools, sent from the agent to the LLM
//!
//! Those wire formats overlap but do not match each other, so everything is
//! converted into these internal structs at the boundary and back out again
//! by the formatter and the provider conversion helpers.
pub mod content;
pub mod message;
pub mod role;
pub mod tool;
