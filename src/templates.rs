//! Rendering of the systemd unit and the nginx site.
//!
//! Both functions are pure: same configuration in, byte-identical text out.
//! Every interpolated value is checked against the syntax it lands in and
//! the render fails closed instead of emitting something that could change
//! the meaning of the surrounding file.

use crate::{
    errors::RenderError,
    model::{ProvisioningConfig, Runtime},
    paths,
};

const LOOPBACK: &str = "127.0.0.1";
const RESTART_DELAY_SECS: u32 = 5;
const STOP_TIMEOUT_SECS: u32 = 30;
const STATIC_CACHE_DAYS: u32 = 30;

type Rendered = std::result::Result<String, RenderError>;

fn guard<'a>(
    field: &'static str,
    value: &'a str,
    target: &'static str,
    allowed: impl Fn(char) -> bool,
) -> std::result::Result<&'a str, RenderError> {
    if !value.is_empty() && value.chars().all(allowed) {
        Ok(value)
    } else {
        Err(RenderError::UnsafeValue {
            field,
            value: value.to_string(),
            target,
        })
    }
}

fn token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// systemd expands `%` specifiers in most settings, including Description,
/// and a trailing `\` would continue the setting onto the next line.
fn unit_description(name: &str) -> std::result::Result<String, RenderError> {
    guard("application name", name, "a systemd unit", |c| {
        !c.is_control() && c != '\\'
    })?;
    Ok(name.replace('%', "%%"))
}

pub fn render_service_unit(config: &ProvisioningConfig) -> Rendered {
    const UNIT: &str = "a systemd unit";

    let code = &config.code_name;
    let user = guard("code name", code.as_str(), UNIT, token_char)?;
    let description = unit_description(&config.display_name)?;
    let cpu_quota = guard("CPU quota", config.cpu_quota.as_str(), UNIT, |c| {
        c.is_ascii_digit() || c == '%'
    })?;
    let memory_max = guard("memory limit", config.memory_max.as_str(), UNIT, |c| {
        c.is_ascii_alphanumeric()
    })?;
    let app_dir = paths::app_dir(code);
    let log_dir = paths::log_dir(code);
    let port = config.port;

    let (environment, exec_start) = match config.runtime {
        Runtime::Node => {
            let version = guard("node version", &config.knobs.node_version, UNIT, |c| {
                c.is_ascii_alphanumeric() || matches!(c, '.' | '/' | '*' | '-')
            })?;
            let entry = guard("entry point", &config.knobs.entry_point, UNIT, |c| {
                token_char(c) || c == '/'
            })?;
            (
                format!(
                    "Environment=NODE_ENV=production\n\
                     Environment=HOST={LOOPBACK}\n\
                     Environment=PORT={port}\n\
                     Environment=NODE_VERSION={version}\n\
                     Environment=WEB_CONCURRENCY={workers}\n",
                    workers = config.workers,
                ),
                format!(
                    "/usr/bin/env HOST={LOOPBACK} PORT={port} {nvm}/nvm-exec node {entry}",
                    nvm = paths::nvm_dir(code).display(),
                ),
            )
        }
        Runtime::Fastapi => {
            let module = guard("app module", &config.knobs.app_module, UNIT, |c| {
                c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':')
            })?;
            (
                format!(
                    "Environment=APP_ENV=production\n\
                     Environment=HOST={LOOPBACK}\n\
                     Environment=PORT={port}\n\
                     Environment=PYTHONUNBUFFERED=1\n"
                ),
                format!(
                    "{venv}/bin/uvicorn {module} --host {LOOPBACK} --port {port} \
                     --workers {workers} --limit-concurrency {concurrency} --backlog {backlog} \
                     --timeout-keep-alive {keepalive} --proxy-headers --forwarded-allow-ips {LOOPBACK}",
                    venv = paths::venv_dir(code).display(),
                    workers = config.workers,
                    concurrency = config.concurrency,
                    backlog = config.backlog,
                    keepalive = config.knobs.keepalive_timeout,
                ),
            )
        }
    };

    Ok(format!(
        "# Managed by appforge. Changes are overwritten on reinstall.\n\
[Unit]\n\
Description={description}\n\
After=network-online.target\n\
Wants=network-online.target\n\
\n\
[Service]\n\
Type=simple\n\
User={user}\n\
Group={user}\n\
WorkingDirectory={app_dir}\n\
{environment}\
ExecStart={exec_start}\n\
Restart=always\n\
RestartSec={RESTART_DELAY_SECS}\n\
Nice={nice}\n\
CPUQuota={cpu_quota}\n\
MemoryMax={memory_max}\n\
LimitNOFILE=65535\n\
TimeoutStopSec={STOP_TIMEOUT_SECS}\n\
KillSignal=SIGTERM\n\
KillMode=mixed\n\
PrivateTmp=true\n\
ProtectSystem=full\n\
ProtectHome=true\n\
NoNewPrivileges=true\n\
StandardOutput=append:{log_dir}/output.log\n\
StandardError=append:{log_dir}/error.log\n\
SyslogIdentifier={user}\n\
\n\
[Install]\n\
WantedBy=multi-user.target\n",
        app_dir = app_dir.display(),
        log_dir = log_dir.display(),
        nice = config.nice,
    ))
}

pub fn render_reverse_proxy_site(config: &ProvisioningConfig) -> Rendered {
    const SITE: &str = "an nginx server block";

    let code = &config.code_name;
    guard("code name", code.as_str(), SITE, token_char)?;
    let domain = guard("domain", config.domain.as_str(), SITE, |c| {
        c.is_ascii_alphanumeric() || matches!(c, '.' | '-')
    })?;
    let body_size = guard(
        "client max body size",
        config.knobs.client_max_body_size.as_str(),
        SITE,
        |c| c.is_ascii_alphanumeric(),
    )?;
    let gzip_level = config.knobs.gzip_level;
    if !(1..=9).contains(&gzip_level) {
        return Err(RenderError::UnsafeValue {
            field: "gzip level",
            value: gzip_level.to_string(),
            target: SITE,
        });
    }
    let keepalive = config.knobs.keepalive_timeout;
    let upstream = format!("http://{LOOPBACK}:{port}", port = config.port);

    Ok(format!(
        r#"# Managed by appforge. Changes are overwritten on reinstall.
server {{
    listen 80;
    listen [::]:80;
    server_name {domain};

    access_log {access_log};
    error_log {error_log};

    client_max_body_size {body_size};
    keepalive_timeout {keepalive}s;

    gzip on;
    gzip_vary on;
    gzip_proxied any;
    gzip_comp_level {gzip_level};
    gzip_min_length 256;
    gzip_types text/plain text/css text/xml text/javascript application/javascript application/json application/xml application/rss+xml image/svg+xml;

    location ~ /\. {{
        deny all;
        access_log off;
        log_not_found off;
    }}

    location ~* (?:^|/)(?:package\.json|package-lock\.json|yarn\.lock|requirements\.txt|\.env)$ {{
        deny all;
    }}

    location ~* \.(?:css|js|mjs|png|jpe?g|gif|ico|svg|webp|woff2?|ttf|eot)$ {{
        proxy_pass {upstream};
        proxy_set_header Host $host;
        expires {STATIC_CACHE_DAYS}d;
        add_header Cache-Control "public, no-transform";
        access_log off;
    }}

    location / {{
        proxy_pass {upstream};
        proxy_http_version 1.1;
        proxy_set_header Upgrade $http_upgrade;
        proxy_set_header Connection "upgrade";
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
        proxy_set_header X-Forwarded-Host $host;
        proxy_cache_bypass $http_upgrade;
        proxy_read_timeout {keepalive}s;
    }}
}}
"#,
        access_log = paths::nginx_access_log(code).display(),
        error_log = paths::nginx_error_log(code).display(),
    ))
}
