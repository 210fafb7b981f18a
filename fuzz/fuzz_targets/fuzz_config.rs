#![no_main]

use libfuzzer_sys::fuzz_target;

use infrastructure::config::AgentConfig;

// Fuzz the configuration parser with arbitrary YAML input.
//
// A config that parses must also convert its timeouts and stale-NAT
// services without error.
fuzz_target!(|data: &[u8]| {
    let Ok(yaml) = std::str::from_utf8(data) else {
        return;
    };
    if yaml.len() > 64 * 1024 {
        return;
    }
    if let Ok(config) = AgentConfig::from_yaml(yaml) {
        assert!(config.timeouts().validate().is_ok());
        assert!(config.stale_nat_services().is_ok());
    }
});
