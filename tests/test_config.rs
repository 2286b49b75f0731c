use relaygate::config::{Config, UnhandledPolicy, CONFIG_ENV, LISTEN_ENV};
use std::net::Ipv4Addr;
use std::time::Duration;

#[test]
fn test_config_defaults() {
    let cfg = Config::default();

    assert_eq!(cfg.listen_addr, "127.0.0.1:1080");
    assert_eq!(cfg.load_balance, "smart");
    assert_eq!(cfg.connect_timeout(), Duration::from_secs(5));
    assert_eq!(cfg.handshake_timeout(), Duration::from_secs(10));
    assert_eq!(cfg.tracing_level(), tracing::Level::INFO);
    assert!(cfg.backends.is_empty());
    assert!(!cfg.target.port.deny_all());
    assert_eq!(cfg.target.unhandled, UnhandledPolicy::Deny);
}

#[test]
fn test_config_env_overrides() {
    // one test owns the env vars so parallel tests never race on them
    unsafe {
        std::env::set_var(CONFIG_ENV, "/nonexistent/relaygate.yaml");
        std::env::remove_var(LISTEN_ENV);
    }
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.listen_addr, "127.0.0.1:1080");

    unsafe {
        std::env::set_var(LISTEN_ENV, "0.0.0.0:3000");
    }
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.listen_addr, "0.0.0.0:3000");

    unsafe {
        std::env::remove_var(LISTEN_ENV);
        std::env::remove_var(CONFIG_ENV);
    }
}

#[test]
fn test_config_from_yaml() {
    let cfg = Config::from_yaml(
        r#"
listen_addr: 0.0.0.0:1080
load_balance: index:1
connect_timeout_ms: 250
log_level: debug
target:
  port:
    deny: all
    denied: [25]
    allowed: [80, 443]
  ip:
    denied: ["6.6.6.6"]
  unhandled: pass
backends:
  - name: primary
    addrs: ["10.0.0.5"]
    port: 8388
  - addrs: ["10.0.0.6", "10.0.1.6"]
    port: 8389
"#,
    )
    .unwrap();

    assert_eq!(cfg.listen_addr, "0.0.0.0:1080");
    assert_eq!(cfg.load_balance, "index:1");
    assert_eq!(cfg.connect_timeout(), Duration::from_millis(250));
    assert_eq!(cfg.handshake_timeout(), Duration::from_secs(10));
    assert_eq!(cfg.tracing_level(), tracing::Level::DEBUG);

    assert!(cfg.target.port.deny_all());
    assert_eq!(cfg.target.port.denied, vec![25]);
    assert_eq!(cfg.target.port.allowed, vec![80, 443]);
    assert!(!cfg.target.ip.deny_all());
    assert_eq!(cfg.target.ip.denied, vec![Ipv4Addr::new(6, 6, 6, 6)]);
    assert_eq!(cfg.target.unhandled, UnhandledPolicy::Pass);

    assert_eq!(cfg.backends.len(), 2);
    assert_eq!(cfg.backends[0].name.as_deref(), Some("primary"));
    assert_eq!(cfg.backends[1].name, None);
    assert_eq!(cfg.backends[1].addrs.len(), 2);
    assert_eq!(cfg.backends[1].port, 8389);
}

#[test]
fn test_config_invalid_ip_rejected() {
    let result = Config::from_yaml(
        r#"
target:
  ip:
    denied: ["not-an-ip"]
"#,
    );

    assert!(result.is_err());
}

#[test]
fn test_config_bad_log_level_falls_back() {
    let cfg = Config::from_yaml("log_level: loud\n").unwrap();
    assert_eq!(cfg.tracing_level(), tracing::Level::INFO);
}

#[test]
fn test_config_clone() {
    let cfg1 = Config::from_yaml("load_balance: roundrobin\n").unwrap();
    let cfg2 = cfg1.clone();
    assert_eq!(cfg1.load_balance, cfg2.load_balance);
}
