use docvault_core::Channel;

/// Server-level configuration for the operation dispatch core.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host name reported in opaque internal errors.
    pub host_name: String,
    /// Tenant used when a username carries no `@tenant` suffix.
    pub default_tenant: String,
    /// Protocol channel this dispatcher serves.
    pub channel: Channel,
    /// API level bound into every identity context.
    pub api_level: u32,
    /// Log the (non-sensitive) arguments of failed operations.
    pub trace_arguments: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host_name: "localhost".to_string(),
            default_tenant: "default".to_string(),
            channel: Channel::Rest,
            api_level: 1,
            trace_arguments: false,
        }
    }
}
