//! `nginx.conf` generation for a service instance.
//!
//! Every backend gets an upstream named after its binding and a local
//! server on its pool port. The front server listens on the port the
//! buildpack substitutes for `{{port}}` and splits traffic across the local
//! servers by weight, with `ip_hash` when sessions are sticky.

use askama::Template;
use flowgate_state::{Backend, ServiceInstance};

use crate::error::DeployResult;

#[derive(Template)]
#[template(path = "nginx.conf", escape = "none")]
struct NginxConf<'a> {
    server_name: String,
    session_sticky: bool,
    backends: &'a [Backend],
}

/// Render the proxy configuration. Output depends only on host, domain,
/// stickiness, and the backends in order.
pub fn render_nginx_conf(instance: &ServiceInstance) -> DeployResult<String> {
    let conf = NginxConf {
        server_name: instance.fqdn(),
        session_sticky: instance.session_sticky,
        backends: &instance.backends,
    };
    Ok(conf.render()?)
}
