//! # Virtual Banking Assistant
//!
//! WebSocket bridge between browser audio and a managed speech-to-speech
//! model, plus the declarative description of the stack that hosts it.
//!
//! ## Modules:
//! - **audio / serializer**: Frame types and the base64 wire codec
//! - **assistant**: Speech-to-speech session seam and the Nova Sonic client
//! - **tools / transcript**: What the assistant can call, and what was said
//! - **websocket / health / handlers / middleware**: The HTTP surface
//! - **config / state / error**: Ambient plumbing shared by all of the above
//! - **infra**: CloudFormation template synthesis for the deployment

pub mod assistant;
pub mod audio;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod infra;
pub mod middleware;
pub mod serializer;
pub mod state;
pub mod tools;
pub mod transcript;
pub mod websocket;
