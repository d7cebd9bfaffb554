//! Predefined log formats in wide use.

use clogger_core::Syntax;

/// Apache-style spellings.
pub mod apache {
    /// Common log format used by Apache.
    pub const COMMON: &str = r#"%h %l %u %t "%r" %>s %b"#;
    /// Combined log format used by Apache.
    pub const COMBINED: &str = r#"%h %l %u %t "%r" %>s %b "%{Referer}i" "%{User-Agent}i""#;
    /// Combined log format as nginx writes it (`0` rather than `-` for empty bodies).
    pub const NGINX_COMBINED: &str =
        r#"%a - %u %t "%r" %>s %B "%{Referer}i" "%{User-Agent}i""#;
    /// Rack 1.0 `CommonLogger` layout.
    pub const RACK_1_0: &str = r#"%h - %u [%{%d/%b/%Y %H:%M:%S}t] "%r" %>s %b %{4}T"#;
}

/// nginx-style spellings.
pub mod nginx {
    pub const COMMON: &str =
        r#"$remote_addr - $remote_user [$time_local] "$request" $status $response_length"#;
    pub const COMBINED: &str = concat!(
        r#"$remote_addr - $remote_user [$time_local] "$request" $status $response_length"#,
        r#" "$http_referer" "$http_user_agent""#
    );
    pub const NGINX_COMBINED: &str = concat!(
        r#"$remote_addr - $remote_user [$time_local] "$request" $status $body_bytes_sent"#,
        r#" "$http_referer" "$http_user_agent""#
    );
    pub const RACK_1_0: &str = concat!(
        r#"$ip - $remote_user [$time_local{%d/%b/%Y %H:%M:%S}] "#,
        r#""$request" $status $response_length $request_time{4}"#
    );
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Common,
    Combined,
    NginxCombined,
    Rack10,
}

impl Preset {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "common" => Some(Preset::Common),
            "combined" => Some(Preset::Combined),
            "nginx_combined" => Some(Preset::NginxCombined),
            "rack_1_0" => Some(Preset::Rack10),
            _ => None,
        }
    }

    pub fn format(self, syntax: Syntax) -> &'static str {
        match (syntax, self) {
            (Syntax::Apache, Preset::Common) => apache::COMMON,
            (Syntax::Apache, Preset::Combined) => apache::COMBINED,
            (Syntax::Apache, Preset::NginxCombined) => apache::NGINX_COMBINED,
            (Syntax::Apache, Preset::Rack10) => apache::RACK_1_0,
            (Syntax::Nginx, Preset::Common) => nginx::COMMON,
            (Syntax::Nginx, Preset::Combined) => nginx::COMBINED,
            (Syntax::Nginx, Preset::NginxCombined) => nginx::NGINX_COMBINED,
            (Syntax::Nginx, Preset::Rack10) => nginx::RACK_1_0,
        }
    }
}

/// A preset name resolves to its format, anything else is taken literally.
pub fn resolve(format: &str, syntax: Syntax) -> &str {
    match Preset::from_name(format) {
        Some(preset) => preset.format(syntax),
        None => format,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{CompileOptions, compile};

    const ALL: [Preset; 4] = [
        Preset::Common,
        Preset::Combined,
        Preset::NginxCombined,
        Preset::Rack10,
    ];

    #[test]
    fn every_preset_compiles_in_both_syntaxes() {
        for syntax in [Syntax::Apache, Syntax::Nginx] {
            for preset in ALL {
                let fmt = preset.format(syntax);
                compile(fmt, &CompileOptions::new(syntax))
                    .unwrap_or_else(|e| panic!("{preset:?}/{syntax:?}: {e}"));
            }
        }
    }

    #[test]
    fn names_resolve() {
        assert_eq!(resolve("combined", Syntax::Apache), apache::COMBINED);
        assert_eq!(resolve("Rack_1_0", Syntax::Nginx), nginx::RACK_1_0);
        assert_eq!(resolve("%h", Syntax::Apache), "%h");
    }

    #[test]
    fn common_needs_body_wrap_for_response_length() {
        let p = compile(apache::COMMON, &CompileOptions::default()).unwrap();
        assert!(p.needs_body_wrap());
        assert!(!p.needs_response_headers());
    }
}
