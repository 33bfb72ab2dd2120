// Integration tests for the server accept loop, wire parsers, and executor
// working together end to end over a real TCP loopback socket.

#[cfg(test)]
mod server_integration_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use memvault::cache::Cache;
    use memvault::config::Config;
    use memvault::server::Server;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::watch;

    async fn spawn_server(config: Config) -> (std::net::SocketAddr, watch::Sender<bool>) {
        let config = config.normalize().unwrap();
        let cache = Arc::new(Cache::new(config, 2));
        let server = Server::bind(&cache).await.unwrap();
        let addr = server.local_addr();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(server.run(cache, shutdown_rx));
        (addr, shutdown_tx)
    }

    async fn read_line(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            stream.read_exact(&mut byte).await.unwrap();
            buf.push(byte[0]);
            if buf.ends_with(b"\r\n") {
                break;
            }
        }
        String::from_utf8(buf).unwrap()
    }

    fn loopback_config() -> Config {
        Config {
            addr: "127.0.0.1".to_string(),
            port: 0,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn ascii_set_then_get_round_trips() {
        let (addr, _shutdown) = spawn_server(loopback_config()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(b"set greeting 0 0 5\r\nhello\r\n").await.unwrap();
        assert_eq!(read_line(&mut stream).await, "STORED\r\n");

        stream.write_all(b"get greeting\r\n").await.unwrap();
        assert_eq!(read_line(&mut stream).await, "VALUE greeting 0 5\r\n");
        assert_eq!(read_line(&mut stream).await, "hello\r\n");
        assert_eq!(read_line(&mut stream).await, "END\r\n");
    }

    #[tokio::test]
    async fn ascii_add_twice_is_not_stored() {
        let (addr, _shutdown) = spawn_server(loopback_config()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(b"add once 0 0 1\r\nx\r\n").await.unwrap();
        assert_eq!(read_line(&mut stream).await, "STORED\r\n");

        stream.write_all(b"add once 0 0 1\r\ny\r\n").await.unwrap();
        assert_eq!(read_line(&mut stream).await, "NOT_STORED\r\n");
    }

    #[tokio::test]
    async fn ascii_delete_then_get_is_a_miss() {
        let (addr, _shutdown) = spawn_server(loopback_config()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(b"set k 0 0 1\r\nv\r\n").await.unwrap();
        assert_eq!(read_line(&mut stream).await, "STORED\r\n");

        stream.write_all(b"delete k\r\n").await.unwrap();
        assert_eq!(read_line(&mut stream).await, "DELETED\r\n");

        stream.write_all(b"get k\r\n").await.unwrap();
        assert_eq!(read_line(&mut stream).await, "END\r\n");
    }

    #[tokio::test]
    async fn ascii_incr_and_decr_clamp_at_zero() {
        let (addr, _shutdown) = spawn_server(loopback_config()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(b"set counter 0 0 1\r\n3\r\n").await.unwrap();
        assert_eq!(read_line(&mut stream).await, "STORED\r\n");

        stream.write_all(b"incr counter 4\r\n").await.unwrap();
        assert_eq!(read_line(&mut stream).await, "7\r\n");

        stream.write_all(b"decr counter 100\r\n").await.unwrap();
        assert_eq!(read_line(&mut stream).await, "0\r\n");
    }

    #[tokio::test]
    async fn ascii_cas_rejects_a_stale_token_then_accepts_the_fresh_one() {
        let (addr, _shutdown) = spawn_server(loopback_config()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(b"set k 0 0 1\r\na\r\n").await.unwrap();
        assert_eq!(read_line(&mut stream).await, "STORED\r\n");

        stream.write_all(b"gets k\r\n").await.unwrap();
        let header = read_line(&mut stream).await;
        let cas: u64 = header.trim_end().rsplit(' ').next().unwrap().parse().unwrap();
        assert_eq!(read_line(&mut stream).await, "a\r\n");
        assert_eq!(read_line(&mut stream).await, "END\r\n");

        stream
            .write_all(format!("cas k 0 0 1 {}\r\nb\r\n", cas.wrapping_add(1)).as_bytes())
            .await
            .unwrap();
        assert_eq!(read_line(&mut stream).await, "EXISTS\r\n");

        stream.write_all(format!("cas k 0 0 1 {cas}\r\nc\r\n").as_bytes()).await.unwrap();
        assert_eq!(read_line(&mut stream).await, "STORED\r\n");
    }

    #[tokio::test]
    async fn append_splices_onto_the_existing_value_over_the_wire() {
        let (addr, _shutdown) = spawn_server(loopback_config()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(b"set k 0 0 5\r\nhello\r\n").await.unwrap();
        assert_eq!(read_line(&mut stream).await, "STORED\r\n");

        stream.write_all(b"append k 0 0 6\r\n world\r\n").await.unwrap();
        assert_eq!(read_line(&mut stream).await, "STORED\r\n");

        stream.write_all(b"get k\r\n").await.unwrap();
        assert_eq!(read_line(&mut stream).await, "VALUE k 0 11\r\n");
        assert_eq!(read_line(&mut stream).await, "hello world\r\n");
        assert_eq!(read_line(&mut stream).await, "END\r\n");
    }

    #[tokio::test]
    async fn flush_all_hides_every_previously_stored_key() {
        let (addr, _shutdown) = spawn_server(loopback_config()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(b"set a 0 0 1\r\n1\r\n").await.unwrap();
        assert_eq!(read_line(&mut stream).await, "STORED\r\n");
        stream.write_all(b"set b 0 0 1\r\n2\r\n").await.unwrap();
        assert_eq!(read_line(&mut stream).await, "STORED\r\n");

        stream.write_all(b"flush_all\r\n").await.unwrap();
        assert_eq!(read_line(&mut stream).await, "OK\r\n");

        stream.write_all(b"get a\r\n").await.unwrap();
        assert_eq!(read_line(&mut stream).await, "END\r\n");
        stream.write_all(b"get b\r\n").await.unwrap();
        assert_eq!(read_line(&mut stream).await, "END\r\n");
    }

    #[tokio::test]
    async fn a_command_split_across_multiple_writes_still_parses() {
        let (addr, _shutdown) = spawn_server(loopback_config()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(b"set split 0 0 5\r\nhel").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        stream.write_all(b"lo\r\n").await.unwrap();

        assert_eq!(read_line(&mut stream).await, "STORED\r\n");
    }

    #[tokio::test]
    async fn quit_closes_the_connection() {
        let (addr, _shutdown) = spawn_server(loopback_config()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(b"quit\r\n").await.unwrap();

        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "server should close the socket after quit");
    }

    #[tokio::test]
    async fn two_connections_observe_each_others_writes() {
        let (addr, _shutdown) = spawn_server(loopback_config()).await;
        let mut writer = TcpStream::connect(addr).await.unwrap();
        let mut reader = TcpStream::connect(addr).await.unwrap();

        writer.write_all(b"set shared 0 0 3\r\nfoo\r\n").await.unwrap();
        assert_eq!(read_line(&mut writer).await, "STORED\r\n");

        reader.write_all(b"get shared\r\n").await.unwrap();
        assert_eq!(read_line(&mut reader).await, "VALUE shared 0 3\r\n");
        assert_eq!(read_line(&mut reader).await, "foo\r\n");
        assert_eq!(read_line(&mut reader).await, "END\r\n");
    }

    #[tokio::test]
    async fn stride_and_eviction_maintenance_runs_without_disrupting_live_traffic() {
        let mut config = loopback_config();
        config.nparts = 2;
        config.volume = 4096;
        let config = config.normalize().unwrap();
        let cache = Arc::new(Cache::new(config, 2));
        let server = Server::bind(&cache).await.unwrap();
        let addr = server.local_addr();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(server.run(cache.clone(), shutdown_rx.clone()));
        tokio::spawn(memvault::server::run_maintenance(
            cache.clone(),
            cache.table.epoch().worker_id(0),
            shutdown_rx,
        ));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        for i in 0..64 {
            let cmd = format!("set k{i} 0 0 4\r\ndata\r\n");
            stream.write_all(cmd.as_bytes()).await.unwrap();
            assert_eq!(read_line(&mut stream).await, "STORED\r\n");
        }

        tokio::time::sleep(Duration::from_millis(200)).await;

        stream.write_all(b"set after 0 0 1\r\nz\r\n").await.unwrap();
        assert_eq!(read_line(&mut stream).await, "STORED\r\n");

        let _ = shutdown_tx.send(true);
    }
}
