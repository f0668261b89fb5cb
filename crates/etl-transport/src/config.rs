/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Address to bind to.
    pub host: String,
    /// Port to listen on (0 for OS-assigned).
    pub port: u16,
    /// Reported by the ping endpoint.
    pub version: String,
    /// Allow cross-origin requests from any origin.
    pub enable_cors: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            version: "1.0.0".into(),
            enable_cors: false,
        }
    }
}
