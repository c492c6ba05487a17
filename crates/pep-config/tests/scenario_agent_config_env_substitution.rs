//! Detection Agent config loading — spec.md §6/§4.1.
//!
//! GREEN when:
//! - `${VAR}` placeholders in the agent YAML are resolved from the process
//!   environment before the document is parsed into typed structs.
//! - Defaults (poll_interval=3s, timeout=30s, alert_threshold=10m,
//!   ssl_mode=disable, state_file) apply when the section omits them.
//! - `AgentConfig`'s `Debug` impl never prints the resolved password/api_key.

use pep_config::agent::load_agent_config_from_str;

const YAML: &str = r#"
database:
  driver: postgres
  host: "${PEP_TEST_DB_HOST}"
  port: 5432
  user: pep_agent
  password: "${PEP_TEST_DB_PASSWORD}"
  db: hospital_ehr
mapping:
  source_table: obitos
  filter_column: id
  fields:
    id: id
    name: nome_paciente
    death_time: data_obito
    cause: causa_mortis
    cns: cns
    cpf: cpf
agent:
  hospital_id: "HOSP-001"
central:
  url: "https://central.example.org"
  api_key: "${PEP_TEST_CENTRAL_KEY}"
"#;

#[test]
fn env_placeholders_are_resolved_before_parsing() {
    std::env::set_var("PEP_TEST_DB_HOST", "ehr.internal");
    std::env::set_var("PEP_TEST_DB_PASSWORD", "s3cr3t");
    std::env::set_var("PEP_TEST_CENTRAL_KEY", "central-key-abc");

    let cfg = load_agent_config_from_str(YAML).expect("agent config must parse");

    assert_eq!(cfg.database.host, "ehr.internal");
    assert_eq!(cfg.database_password.expose(), "s3cr3t");
    assert_eq!(cfg.central_api_key.expose(), "central-key-abc");
}

#[test]
fn defaults_apply_when_sections_are_omitted() {
    std::env::set_var("PEP_TEST_DB_HOST", "ehr.internal");
    std::env::set_var("PEP_TEST_DB_PASSWORD", "s3cr3t");
    std::env::set_var("PEP_TEST_CENTRAL_KEY", "central-key-abc");

    let cfg = load_agent_config_from_str(YAML).expect("agent config must parse");

    assert_eq!(cfg.database.ssl_mode, "disable");
    assert_eq!(cfg.poll_interval.as_secs(), 3);
    assert_eq!(cfg.central_timeout.as_secs(), 30);
    assert_eq!(cfg.alert_threshold.as_secs(), 600);
    assert_eq!(cfg.state_file, "/var/lib/pep-agent/state.json");
}

#[test]
fn poll_interval_is_clamped_to_documented_range() {
    let yaml_fast = YAML.replace(
        "agent:\n  hospital_id: \"HOSP-001\"",
        "agent:\n  hospital_id: \"HOSP-001\"\n  poll_interval: 0",
    );
    std::env::set_var("PEP_TEST_DB_HOST", "ehr.internal");
    std::env::set_var("PEP_TEST_DB_PASSWORD", "s3cr3t");
    std::env::set_var("PEP_TEST_CENTRAL_KEY", "central-key-abc");

    let cfg = load_agent_config_from_str(&yaml_fast).expect("agent config must parse");
    assert_eq!(cfg.poll_interval_clamped().as_secs(), 1);

    let yaml_slow = YAML.replace(
        "agent:\n  hospital_id: \"HOSP-001\"",
        "agent:\n  hospital_id: \"HOSP-001\"\n  poll_interval: 99",
    );
    let cfg = load_agent_config_from_str(&yaml_slow).expect("agent config must parse");
    assert_eq!(cfg.poll_interval_clamped().as_secs(), 10);
}

#[test]
fn debug_output_never_prints_plaintext_secrets() {
    std::env::set_var("PEP_TEST_DB_HOST", "ehr.internal");
    std::env::set_var("PEP_TEST_DB_PASSWORD", "s3cr3t-value");
    std::env::set_var("PEP_TEST_CENTRAL_KEY", "central-key-should-not-leak");

    let cfg = load_agent_config_from_str(YAML).expect("agent config must parse");
    let debug_str = format!("{:?}", cfg);

    assert!(!debug_str.contains("s3cr3t-value"));
    assert!(!debug_str.contains("central-key-should-not-leak"));
    assert!(debug_str.contains("REDACTED"));
}

#[test]
fn unresolved_placeholder_surfaces_as_parse_error_not_blank_value() {
    std::env::remove_var("PEP_TEST_DB_HOST_MISSING_XYZ");
    let yaml = YAML.replace("${PEP_TEST_DB_HOST}", "${PEP_TEST_DB_HOST_MISSING_XYZ}");
    std::env::set_var("PEP_TEST_DB_PASSWORD", "s3cr3t");
    std::env::set_var("PEP_TEST_CENTRAL_KEY", "central-key-abc");

    let cfg = load_agent_config_from_str(&yaml).expect("yaml still parses as text");
    // Left untouched per spec.md §6 — the literal placeholder string surfaces,
    // not an empty value that would be indistinguishable from a real host.
    assert_eq!(cfg.database.host, "${PEP_TEST_DB_HOST_MISSING_XYZ}");
}
