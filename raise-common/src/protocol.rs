//! # Protocol Messages
//!
//! Typed payload schemas for every method the fabric carries. Field sets follow
//! the method table: only the fields a given method actually uses are present on
//! its request/response structs, everything else is simply absent from the JSON.

use serde::{Deserialize, Serialize};

pub mod methods {
    pub const COMMON_PING: &str = "Common_Ping";
    pub const CONTROL_HELLO: &str = "Control_Hello";
    pub const CLIENT_GET_WORKERS: &str = "Client_GetWorkers";
    pub const COMMON_GET_INFO: &str = "Common_GetInfo";
    pub const COMMON_SEND_MESSAGE: &str = "Common_SendMessage";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PingRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PingResponse {
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HelloRequest {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HelloResponse {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetWorkersRequest {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetWorkersResponse {
    pub workers: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetInfoRequest {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetInfoResponse {
    pub hostname: String,
    pub home_dir: String,
    pub operating_system: String,
    pub architecture: String,
}

/// The kind of operation a `Common_SendMessage` call asks the worker to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    ReadFile,
    WriteFile,
    RunScript,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendMessageRequest {
    /// Populated only on the client->broker hop; stripped before forwarding
    /// broker->worker since the worker already knows who it is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub kind: Option<MessageKind>,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendMessageResponse {
    #[serde(default)]
    pub content: Vec<u8>,
}
