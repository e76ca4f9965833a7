#[cfg(windows)]
const TEMPLATE: &str = r#"[Service]
ExecStart=aesoplite-relay.exe --config C:\etc\aesoplite-relay\aesoplite-relay.toml
Restart=always
"#;

#[cfg(not(windows))]
const TEMPLATE: &str = r#"[Unit]
Description=AESOPLite serial to UDP relay
After=network-online.target
Wants=network-online.target

[Service]
ExecStart=/usr/local/bin/aesoplite-relay --config /etc/aesoplite-relay/aesoplite-relay.toml
Restart=always
RestartSec=5

[Install]
WantedBy=multi-user.target
"#;

pub fn platform_template() -> &'static str {
    TEMPLATE
}

pub fn log_platform_guidance() {
    tracing::debug!(
        template = platform_template(),
        "platform-specific service descriptor available"
    );
}
