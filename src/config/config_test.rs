use super::*;

#[test]
fn default_config_is_valid() {
    let config = Config::default();
    assert_eq!(config.transport.kind, "stdio");
    assert_eq!(config.transport.http_port, DEFAULT_HTTP_PORT);
    assert!(config.validate().is_ok());
}

#[test]
fn round_trips_through_json() {
    let config = Config::default();
    let json = serde_json::to_string_pretty(&config).unwrap();
    let parsed: Config = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.transport.kind, config.transport.kind);
    assert_eq!(parsed.oauth_provider.issuer, config.oauth_provider.issuer);
}

#[test]
fn rejects_unsupported_transport() {
    let mut config = Config::default();
    config.transport.kind = "websocket".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn rejects_incomplete_oauth_consumer() {
    let mut config = Config::default();
    config.oauth_consumer = Some(OAuthConsumerConfig {
        provider: "github".to_string(),
        client_id: String::new(),
        client_secret: String::new(),
        auth_url: "https://github.com/login/oauth/authorize".to_string(),
        token_url: "https://github.com/login/oauth/access_token".to_string(),
        redirect_uri: "http://localhost:3330/oauth/callback".to_string(),
        scopes: vec![],
        userinfo_url: "https://api.github.com/user".to_string(),
    });
    assert!(config.validate().is_err());
}

#[test]
fn env_overrides_take_precedence_over_file_defaults() {
    let mut config = Config::default();
    unsafe {
        std::env::set_var(ENV_HTTP_PORT, "9999");
        std::env::set_var(ENV_MCP_TRANSPORT, "http");
    }
    config.apply_env_overrides();
    unsafe {
        std::env::remove_var(ENV_HTTP_PORT);
        std::env::remove_var(ENV_MCP_TRANSPORT);
    }
    assert_eq!(config.transport.http_port, 9999);
    assert_eq!(config.transport.kind, "http");
}

#[test]
fn load_from_missing_path_returns_default() {
    let config = Config::load_from_path("/nonexistent/mcpforge.config.json").unwrap();
    assert_eq!(config.transport.kind, "stdio");
}

#[test]
fn save_and_reload_round_trips() {
    let dir = std::env::temp_dir().join(format!("mcpforge-config-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("mcpforge.config.json");

    let mut config = Config::default();
    config.transport.http_port = 4444;
    config.save_to_path(&path).unwrap();

    let reloaded = Config::load_from_path(&path).unwrap();
    assert_eq!(reloaded.transport.http_port, 4444);

    std::fs::remove_dir_all(&dir).ok();
}
