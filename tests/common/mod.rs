#![allow(dead_code)]

use appforge::model::{ProvisioningConfig, Runtime};

/// demoapp on port 8080 with nice 0, a 50% CPU quota and a 1G memory cap.
pub fn demo_config(runtime: Runtime) -> ProvisioningConfig {
    let runtime = match runtime {
        Runtime::Node => "node",
        Runtime::Fastapi => "fastapi",
    };
    ProvisioningConfig::from_json(&demo_answers(runtime)).expect("valid demo config")
}

pub fn demo_answers(runtime: &str) -> String {
    format!(
        r#"{{
    "display_name": "Demo App",
    "code_name": "demoapp",
    "repository": "https://github.com/acme/demoapp.git",
    "domain": "demo.example.com",
    "runtime": "{runtime}",
    "port": 8080,
    "workers": 3,
    "nice": 0,
    "cpu_quota": "50%",
    "memory_max": "1G"
}}"#
    )
}
