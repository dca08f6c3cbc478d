//! Wire method and notification names.

pub const INITIALIZE: &str = "initialize";
pub const PING: &str = "ping";

pub const TOOLS_LIST: &str = "tools/list";
pub const TOOLS_CALL: &str = "tools/call";
pub const RESOURCES_LIST: &str = "resources/list";
pub const RESOURCES_LIST_TEMPLATES: &str = "resources/list_templates";
pub const RESOURCES_READ: &str = "resources/read";
pub const PROMPTS_LIST: &str = "prompts/list";
pub const PROMPTS_GET: &str = "prompts/get";
pub const COMPLETION_COMPLETE: &str = "completion/complete";
pub const LOGGING_SET_LEVEL: &str = "logging/setLevel";

/// Server → client request: ask the client's LLM for a completion.
pub const SAMPLING_CREATE_MESSAGE: &str = "sampling/createMessage";

// Notifications
pub const NOTIFICATION_INITIALIZED: &str = "initialized";
pub const NOTIFICATION_EXIT: &str = "exit";
pub const NOTIFICATION_CANCELLED: &str = "$/cancelled";
pub const NOTIFICATION_PROGRESS: &str = "$/progress";
pub const NOTIFICATION_MESSAGE: &str = "notifications/message";
pub const NOTIFICATION_TOOLS_LIST_CHANGED: &str = "tools/list_changed";
pub const NOTIFICATION_RESOURCES_LIST_CHANGED: &str = "resources/list_changed";
pub const NOTIFICATION_PROMPTS_LIST_CHANGED: &str = "prompts/list_changed";
