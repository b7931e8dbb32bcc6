//! Minimal embedding: a `poll(2)` loop playing the reactor's role.
//!
//!     cargo run --example hello
//!     curl http://127.0.0.1:8080/anything

#[cfg(unix)]
fn main() {
    use std::os::unix::io::AsRawFd;
    use std::time::Instant;

    use sxe_httpd::rt::{TcpListener, TcpStream};
    use sxe_httpd::server::{Builder, Httpd};
    use sxe_httpd::{Handler, Request, StatusCode};

    struct Hello;

    impl Handler<TcpStream> for Hello {
        fn respond(&mut self, req: &mut Request<'_, TcpStream>) {
            let body = format!("hello from {}\n", String::from_utf8_lossy(req.url()));
            if req
                .response_simple(StatusCode::OK, "OK", body.as_bytes())
                .is_err()
            {
                req.response_close();
            }
        }
    }

    let mut httpd: Httpd<TcpListener, Hello> =
        Builder::new().pool_capacity(32).build(Hello);
    let addr = httpd.listen("INADDR_ANY", 8080).expect("bind 0.0.0.0:8080");
    println!("listening on http://{}", addr);

    loop {
        let mut fds = Vec::new();
        let has_listener = httpd.listener().is_some();
        if let Some(listener) = httpd.listener() {
            fds.push(libc::pollfd {
                fd: listener.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            });
        }
        let mut live = Vec::new();
        for index in 0..httpd.capacity() {
            if let Some(sock) = httpd.socket(index) {
                live.push(index);
                fds.push(libc::pollfd {
                    fd: sock.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                });
            }
        }

        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, 1000) };
        if rc < 0 {
            eprintln!("poll failed: {}", std::io::Error::last_os_error());
            return;
        }

        let now = Instant::now();
        let mut ready = fds.iter();
        if has_listener {
            if ready.next().map_or(false, |p| p.revents != 0) {
                httpd.accept_ready(now);
            }
        }
        for (&index, pfd) in live.iter().zip(ready) {
            if pfd.revents != 0 {
                httpd.read_ready(index, now);
            }
        }
        httpd.tick(now);
    }
}

#[cfg(not(unix))]
fn main() {
    eprintln!("this demo uses poll(2) and only runs on unix");
}
