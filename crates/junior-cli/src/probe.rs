//! Startup reachability check for the Wi-Fi firmware.

use std::time::Duration;

use junior_middleware::{HttpCommand, HttpConfig, codec::parse_distance};

/// Send a stop to the command endpoint and return the reported distance.
///
/// A stop is harmless, so it doubles as the probe.
pub fn probe_vehicle(cfg: &HttpConfig) -> Result<f32, String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_millis(cfg.stop_timeout_ms))
        .build()
        .map_err(|e| e.to_string())?;

    let body = client
        .get(cfg.command_url())
        .query(&HttpCommand::stop().query(&cfg.routes))
        .send()
        .and_then(|r| r.error_for_status())
        .and_then(|r| r.text())
        .map_err(|e| e.to_string())?;

    parse_distance(&body).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    fn serve_once(body: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        port
    }

    #[test]
    fn probe_reads_distance() {
        let port = serve_once("57");
        let cfg = HttpConfig {
            cmd_port: port,
            ..HttpConfig::default()
        };
        assert_eq!(probe_vehicle(&cfg), Ok(57.0));
    }

    #[test]
    fn probe_fails_when_nothing_listens() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("addr").port()
        };
        let cfg = HttpConfig {
            cmd_port: port,
            stop_timeout_ms: 200,
            ..HttpConfig::default()
        };
        assert!(probe_vehicle(&cfg).is_err());
    }
}
