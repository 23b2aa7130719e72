//! Example configuration shipped with the binary
//!
//! Printed by `dnsproof check-config --example` as a starting point.

/// Example configuration in TOML format
pub const EXAMPLE_CONFIG_TOML: &str = r#"
# dnsproof example configuration

[acme]
environment = "staging"          # or "production"
admin_email = "admin@example.com"
account_key_path = "acme/account.json"

[verification]
txt_record_name = "mastodon_ownership_key"
ownership_key_ttl_secs = 86400
ownership_key_policy = "overwrite"   # or "preserve_pending"
owned_hosts = ["203.0.113.10"]
owned_cnames = ["edge.example.net"]
nameservers = ["1.1.1.1", "8.8.8.8"]

[storage]
records_path = "dnsproof-records.json"
blob_root = "data"
cert_prefix = "mastodon_le_certs/"

[polling]
initial_delay_ms = 1000
backoff_factor = 2
max_delay_ms = 16000
timeout_secs = 120
"#;
