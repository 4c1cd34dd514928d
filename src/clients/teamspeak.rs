//! Teamspeak3 serverquery client.
//!
//! The serverquery protocol is line-oriented: one command per line, values
//! escaped with the protocol's own table, responses consisting of zero or
//! one data line (records separated by `|`) followed by an
//! `error id=... msg=...` status line. The server answers with a single
//! record or a pipe-separated list depending on how many rows matched;
//! [`Ts3Connection::send_command`] always hands back a `Vec` so nothing
//! downstream ever branches on response shape.

use crate::config::Teamspeak3Config;
use crate::{Error, Result};
use std::collections::HashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, trace};

const SERVICE: &str = "teamspeak3";

/// One key/value record from a serverquery response.
pub type QueryRecord = HashMap<String, String>;

/// Escape a value for transmission per the serverquery escape table.
pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '/' => out.push_str("\\/"),
            ' ' => out.push_str("\\s"),
            '|' => out.push_str("\\p"),
            '\x07' => out.push_str("\\a"),
            '\x08' => out.push_str("\\b"),
            '\x0c' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x0b' => out.push_str("\\v"),
            _ => out.push(c),
        }
    }
    out
}

/// Reverse of [`escape`]. Unknown escape sequences pass through verbatim.
pub fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('s') => out.push(' '),
            Some('p') => out.push('|'),
            Some('a') => out.push('\x07'),
            Some('b') => out.push('\x08'),
            Some('f') => out.push('\x0c'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('v') => out.push('\x0b'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Parse a response body line into records. A single record and a
/// pipe-separated list come back in the same shape.
pub fn parse_records(line: &str) -> Vec<QueryRecord> {
    line.split('|')
        .map(|chunk| {
            let mut record = QueryRecord::new();
            for field in chunk.split(' ').filter(|f| !f.is_empty()) {
                match field.split_once('=') {
                    Some((key, value)) => {
                        record.insert(unescape(key), unescape(value));
                    }
                    None => {
                        record.insert(unescape(field), String::new());
                    }
                }
            }
            record
        })
        .filter(|r| !r.is_empty())
        .collect()
}

/// An authenticated serverquery session bound to one virtual server.
///
/// Connections are cheap and single-purpose: each adapter operation opens
/// one, runs its commands sequentially and drops it, so no locking is needed
/// for concurrent adapter use.
pub struct Ts3Connection {
    stream: BufReader<TcpStream>,
}

impl Ts3Connection {
    /// Connect, authenticate and select the configured virtual server.
    pub async fn open(config: &Teamspeak3Config) -> Result<Self> {
        let stream = TcpStream::connect((config.host.as_str(), config.port)).await?;
        let mut conn = Self {
            stream: BufReader::new(stream),
        };

        let greeting = conn.read_line().await?;
        if !greeting.starts_with("TS3") {
            return Err(Error::Protocol {
                context: "greeting".to_string(),
                message: format!("unexpected banner: {greeting}"),
            });
        }
        // Second banner line ("Welcome to the TeamSpeak 3 ServerQuery...").
        conn.read_line().await?;

        conn.send_command(
            "login",
            &[
                ("client_login_name", &config.query_user),
                ("client_login_password", &config.query_password),
            ],
            &[],
        )
        .await?;
        conn.send_command("use", &[("sid", &config.virtual_server.to_string())], &[])
            .await?;
        debug!("Got TS3 server instance based on settings.");
        Ok(conn)
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = self.stream.read_line(&mut line).await?;
        if n == 0 {
            return Err(Error::Protocol {
                context: "read".to_string(),
                message: "connection closed by server".to_string(),
            });
        }
        Ok(line.trim_end_matches(&['\r', '\n'][..]).to_string())
    }

    /// Send one command and collect its response records.
    ///
    /// A non-zero `error id` status becomes [`Error::Remote`] carrying the
    /// server's unescaped message.
    pub async fn send_command(
        &mut self,
        command: &str,
        params: &[(&str, &str)],
        opts: &[&str],
    ) -> Result<Vec<QueryRecord>> {
        let mut line = String::from(command);
        for (key, value) in params {
            line.push(' ');
            line.push_str(key);
            line.push('=');
            line.push_str(&escape(value));
        }
        for opt in opts {
            line.push_str(" -");
            line.push_str(opt);
        }
        trace!("ts3 >> {}", line);
        line.push('\n');
        self.stream.get_mut().write_all(line.as_bytes()).await?;
        self.stream.get_mut().flush().await?;

        let mut records = Vec::new();
        loop {
            let response = self.read_line().await?;
            if response.is_empty() {
                continue;
            }
            trace!("ts3 << {}", response);
            if let Some(status) = response.strip_prefix("error ") {
                let status = parse_records(status)
                    .into_iter()
                    .next()
                    .unwrap_or_default();
                let id = status.get("id").map(String::as_str).unwrap_or("");
                if id == "0" {
                    return Ok(records);
                }
                // 1281 is "database empty result set": an empty match, not
                // a failure.
                if id == "1281" {
                    return Err(Error::not_found(SERVICE, "record", command));
                }
                let msg = status.get("msg").cloned().unwrap_or_default();
                return Err(Error::remote(SERVICE, format!("{command}: {msg} (id {id})")));
            }
            records.extend(parse_records(&response));
        }
    }

    /// Close the session politely; errors on the way out are ignored.
    pub async fn quit(mut self) {
        let _ = self.stream.get_mut().write_all(b"quit\n").await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn escape_round_trips_protocol_characters() {
        let raw = "a b|c/d\\e\tf";
        assert_eq!(unescape(&escape(raw)), raw);
        assert_eq!(escape("a b"), "a\\sb");
        assert_eq!(unescape("Fleet\\sOps"), "Fleet Ops");
    }

    #[test]
    fn single_record_normalizes_to_vec_of_one() {
        let records = parse_records("name=Pilots sgid=7");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["name"], "Pilots");
        assert_eq!(records[0]["sgid"], "7");
    }

    #[test]
    fn list_response_splits_on_pipe() {
        let records = parse_records("sgid=6 name=Guest|sgid=7 name=Fleet\\sOps");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["name"], "Fleet Ops");
    }

    #[test]
    fn bare_flags_parse_to_empty_values() {
        let records = parse_records("cldbid=3 client_unique_identifier=abc= -uid");
        assert_eq!(records[0]["client_unique_identifier"], "abc=");
        assert!(records[0].contains_key("-uid"));
    }

    /// Canned serverquery conversation covering login, use and one command
    /// returning a list response.
    #[tokio::test]
    async fn connection_handshake_and_command() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"TS3\nWelcome to the TeamSpeak 3 ServerQuery interface\n")
                .await
                .unwrap();

            let mut buf = vec![0u8; 1024];
            let mut pending = String::new();
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                pending.push_str(std::str::from_utf8(&buf[..n]).unwrap());
                while let Some(idx) = pending.find('\n') {
                    let line: String = pending.drain(..=idx).collect();
                    let line = line.trim();
                    let reply: &[u8] = if line.starts_with("login") || line.starts_with("use") {
                        b"error id=0 msg=ok\n"
                    } else if line.starts_with("servergrouplist") {
                        b"sgid=6 name=Guest|sgid=7 name=Fleet\\sOps\nerror id=0 msg=ok\n"
                    } else if line.starts_with("clientdbfind") {
                        b"error id=1281 msg=database\\sempty\\sresult\\sset\n"
                    } else {
                        b"error id=0 msg=ok\n"
                    };
                    socket.write_all(reply).await.unwrap();
                }
            }
        });

        let config = Teamspeak3Config {
            host: addr.ip().to_string(),
            port: addr.port(),
            query_user: "serveradmin".to_string(),
            query_password: "secret".to_string(),
            ..Teamspeak3Config::default()
        };

        let mut conn = Ts3Connection::open(&config).await.unwrap();

        let groups = conn.send_command("servergrouplist", &[], &[]).await.unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1]["name"], "Fleet Ops");

        let err = conn
            .send_command("clientdbfind", &[("pattern", "missing")], &["uid"])
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        drop(conn);
        server.abort();
    }
}
