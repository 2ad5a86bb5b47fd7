//! Fixed on-host layout for one managed application.

use std::path::PathBuf;

use crate::model::CodeName;

pub const WEB_ROOT: &str = "/var/www";
pub const LOG_ROOT: &str = "/var/log";
pub const SYSTEMD_DIR: &str = "/etc/systemd/system";
pub const NGINX_AVAILABLE: &str = "/etc/nginx/sites-available";
pub const NGINX_ENABLED: &str = "/etc/nginx/sites-enabled";
pub const NGINX_LOG_DIR: &str = "/var/log/nginx";

pub fn home_dir(code: &CodeName) -> PathBuf {
    PathBuf::from(WEB_ROOT).join(code.as_str())
}

pub fn app_dir(code: &CodeName) -> PathBuf {
    home_dir(code).join("app")
}

pub fn venv_dir(code: &CodeName) -> PathBuf {
    home_dir(code).join("venv")
}

pub fn nvm_dir(code: &CodeName) -> PathBuf {
    home_dir(code).join(".nvm")
}

pub fn log_dir(code: &CodeName) -> PathBuf {
    PathBuf::from(LOG_ROOT).join(code.as_str())
}

pub fn unit_name(code: &CodeName) -> String {
    format!("{code}.service")
}

pub fn unit_path(code: &CodeName) -> PathBuf {
    PathBuf::from(SYSTEMD_DIR).join(unit_name(code))
}

pub fn site_path(code: &CodeName) -> PathBuf {
    PathBuf::from(NGINX_AVAILABLE).join(code.as_str())
}

pub fn site_link(code: &CodeName) -> PathBuf {
    PathBuf::from(NGINX_ENABLED).join(code.as_str())
}

pub fn nginx_access_log(code: &CodeName) -> PathBuf {
    PathBuf::from(NGINX_LOG_DIR).join(format!("{code}.access.log"))
}

pub fn nginx_error_log(code: &CodeName) -> PathBuf {
    PathBuf::from(NGINX_LOG_DIR).join(format!("{code}.error.log"))
}
