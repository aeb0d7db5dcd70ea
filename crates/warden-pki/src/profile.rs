//! Client connection profiles.

use serde::Serialize;

use crate::org::ServerProfile;

const AUTH_USER_PASS: &str = "auth-user-pass\n";

/// One rendered profile, named the way it appears inside a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientProfile {
    pub name: String,
    pub conf: String,
}

fn base_conf(server: &ServerProfile) -> String {
    format!(
        "client\n\
         dev tun\n\
         proto {protocol}\n\
         remote {address} {port}\n\
         resolv-retry infinite\n\
         nobind\n\
         persist-key\n\
         persist-tun\n\
         remote-cert-tls server\n\
         verb 2\n\
         mute 3\n",
        protocol = server.protocol,
        address = server.public_address,
        port = server.port,
    )
}

/// Profile that points at certificate and key files shipped beside it.
pub fn render_with_files(
    server: &ServerProfile,
    ca_file: &str,
    cert_file: &str,
    key_file: &str,
) -> String {
    let mut conf = base_conf(server);
    conf.push_str(&format!("ca {ca_file}\ncert {cert_file}\nkey {key_file}\n"));
    if server.otp_auth {
        conf.push_str(AUTH_USER_PASS);
    }
    conf
}

/// Self-contained profile embedding the PEM material.
pub fn render_inline(server: &ServerProfile, ca_pem: &str, cert_pem: &str, key_pem: &str) -> String {
    let mut conf = base_conf(server);
    if server.otp_auth {
        conf.push_str(AUTH_USER_PASS);
    }
    for (tag, pem) in [("ca", ca_pem), ("cert", cert_pem), ("key", key_pem)] {
        conf.push_str(&format!("<{tag}>\n{}\n</{tag}>\n", pem.trim()));
    }
    conf
}

/// Bundle entry name `<org>_<identity>[_<server>].<ext>`. Path separators
/// in display names would nest entries, so they are replaced.
pub fn entry_name(org_name: &str, identity_name: &str, server_name: Option<&str>, ext: &str) -> String {
    let mut name = format!("{org_name}_{identity_name}");
    if let Some(server_name) = server_name {
        name.push('_');
        name.push_str(server_name);
    }
    let name = name.replace(['/', '\\'], "_");
    format!("{name}.{ext}")
}
