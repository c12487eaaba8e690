#![allow(dead_code)]

pub mod test_server {
    use std::sync::Once;

    /// Ensures May coroutines are configured only once
    static MAY_INIT: Once = Once::new();

    pub fn setup_may_runtime() {
        MAY_INIT.call_once(|| {
            may::config().set_stack_size(0x8000);
        });
    }
}

pub mod http {
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpStream};
    use std::time::{Duration, Instant};

    /// A response read to EOF, with the chunked body decoded.
    #[derive(Debug)]
    pub struct RawResponse {
        pub status: u16,
        pub headers: Vec<(String, String)>,
        pub body: String,
        /// Body chunk payloads in arrival order, with their arrival times.
        pub chunks: Vec<(Instant, String)>,
    }

    impl RawResponse {
        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        }

        pub fn is_chunked(&self) -> bool {
            self.header("transfer-encoding") == Some("chunked")
        }
    }

    pub fn get(addr: SocketAddr, target: &str) -> RawResponse {
        send_request(addr, &format!("GET {target} HTTP/1.1\r\nHost: test\r\n\r\n"))
    }

    pub fn post_form(addr: SocketAddr, target: &str, body: &str) -> RawResponse {
        send_request(
            addr,
            &format!(
                "POST {target} HTTP/1.1\r\nHost: test\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{body}",
                body.len()
            ),
        )
    }

    /// Send raw request bytes and read until the server closes.
    pub fn send_request(addr: SocketAddr, raw: &str) -> RawResponse {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        stream.write_all(raw.as_bytes()).unwrap();

        let mut buf = Vec::new();
        let mut head_end = None;
        let mut tmp = [0u8; 4096];
        while head_end.is_none() {
            let n = stream.read(&mut tmp).unwrap();
            assert!(n > 0, "connection closed before response head");
            buf.extend_from_slice(&tmp[..n]);
            head_end = find(&buf, b"\r\n\r\n");
        }
        let head_end = head_end.unwrap();
        let (status, headers) = parse_head(&buf[..head_end]);
        let chunked = headers
            .iter()
            .any(|(k, v)| k.eq_ignore_ascii_case("transfer-encoding") && v == "chunked");

        let mut rest = buf[head_end + 4..].to_vec();
        let mut chunks = Vec::new();
        if chunked {
            loop {
                match take_chunk(&mut rest) {
                    Some(None) => break,
                    Some(Some(payload)) => chunks.push((Instant::now(), payload)),
                    None => {
                        let n = stream.read(&mut tmp).unwrap();
                        assert!(n > 0, "connection closed inside chunked body");
                        rest.extend_from_slice(&tmp[..n]);
                    }
                }
            }
        } else {
            stream.read_to_end(&mut rest).unwrap();
            chunks.push((Instant::now(), String::from_utf8_lossy(&rest).into_owned()));
        }
        let body = chunks.iter().map(|(_, c)| c.as_str()).collect();
        RawResponse {
            status,
            headers,
            body,
            chunks,
        }
    }

    /// Send a `HEAD` request and read to EOF. `body` holds whatever followed
    /// the head, which should be nothing.
    pub fn head(addr: SocketAddr, target: &str) -> RawResponse {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        stream
            .write_all(format!("HEAD {target} HTTP/1.1\r\nHost: test\r\n\r\n").as_bytes())
            .unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).unwrap();
        let head_end = find(&buf, b"\r\n\r\n").expect("response head");
        let (status, headers) = parse_head(&buf[..head_end]);
        RawResponse {
            status,
            headers,
            body: String::from_utf8_lossy(&buf[head_end + 4..]).into_owned(),
            chunks: Vec::new(),
        }
    }

    fn parse_head(raw: &[u8]) -> (u16, Vec<(String, String)>) {
        let head = String::from_utf8_lossy(raw).into_owned();
        let mut lines = head.split("\r\n");
        let status = lines
            .next()
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|s| s.parse().ok())
            .unwrap();
        let headers = lines
            .filter_map(|l| l.split_once(':'))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();
        (status, headers)
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    /// `None`: need more bytes. `Some(None)`: terminating chunk.
    fn take_chunk(buf: &mut Vec<u8>) -> Option<Option<String>> {
        let line_end = find(buf, b"\r\n")?;
        let size = usize::from_str_radix(std::str::from_utf8(&buf[..line_end]).ok()?.trim(), 16)
            .unwrap();
        let total = line_end + 2 + size + 2;
        if buf.len() < total {
            return None;
        }
        let payload = String::from_utf8_lossy(&buf[line_end + 2..line_end + 2 + size]).into_owned();
        buf.drain(..total);
        Some((size > 0).then_some(payload))
    }
}

pub mod temp_files {
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Write `content` to a fresh `.yaml` file that is removed on drop.
    pub fn yaml(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }
}
