//! In-process Tyrant server used by the integration tests.
//!
//! Implements the wire protocol for the commands the tests exercise over a
//! real TCP socket, with one sequential task per connection so replies come
//! back in request order, just like the real server.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

type Store = Arc<Mutex<BTreeMap<Vec<u8>, Vec<u8>>>>;

pub struct TestServer {
    pub addr: String,
    pub store: Store,
    pub search_count: Arc<AtomicUsize>,
}

impl TestServer {
    pub async fn spawn(dbtype: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr").to_string();
        let store: Store = Arc::new(Mutex::new(BTreeMap::new()));
        let search_count = Arc::new(AtomicUsize::new(0));

        let state = ServerState {
            dbtype: dbtype.to_string(),
            store: Arc::clone(&store),
            search_count: Arc::clone(&search_count),
        };
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let state = state.clone();
                tokio::spawn(async move {
                    let _ = serve(socket, state).await;
                });
            }
        });

        Self {
            addr,
            store,
            search_count,
        }
    }

    pub fn url(&self) -> String {
        format!("tyrant://{}", self.addr)
    }

    pub fn searches(&self) -> usize {
        self.search_count.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct ServerState {
    dbtype: String,
    store: Store,
    search_count: Arc<AtomicUsize>,
}

struct IterState {
    keys: Vec<Vec<u8>>,
    pos: usize,
}

async fn serve(mut socket: TcpStream, state: ServerState) -> std::io::Result<()> {
    let mut iter = IterState {
        keys: Vec::new(),
        pos: 0,
    };
    loop {
        let mut header = [0u8; 2];
        if socket.read_exact(&mut header).await.is_err() {
            return Ok(());
        }
        assert_eq!(header[0], 0xC8, "bad magic");
        let mut reply = Vec::new();
        match header[1] {
            // put
            0x10 => {
                let (key, value) = read_kv(&mut socket).await?;
                state.store.lock().await.insert(key, value);
                reply.push(0);
            }
            // putkeep
            0x11 => {
                let (key, value) = read_kv(&mut socket).await?;
                let mut store = state.store.lock().await;
                if store.contains_key(&key) {
                    reply.push(1);
                } else {
                    store.insert(key, value);
                    reply.push(0);
                }
            }
            // putcat
            0x12 => {
                let (key, value) = read_kv(&mut socket).await?;
                let mut store = state.store.lock().await;
                store.entry(key).or_default().extend_from_slice(&value);
                reply.push(0);
            }
            // putshl
            0x13 => {
                let klen = read_u32(&mut socket).await? as usize;
                let vlen = read_u32(&mut socket).await? as usize;
                let width = read_u32(&mut socket).await? as usize;
                let key = read_bytes(&mut socket, klen).await?;
                let value = read_bytes(&mut socket, vlen).await?;
                let mut store = state.store.lock().await;
                let record = store.entry(key).or_default();
                record.extend_from_slice(&value);
                if record.len() > width {
                    let cut = record.len() - width;
                    record.drain(..cut);
                }
                reply.push(0);
            }
            // putnr: no reply at all
            0x18 => {
                let (key, value) = read_kv(&mut socket).await?;
                state.store.lock().await.insert(key, value);
            }
            // out
            0x20 => {
                let key = read_lp(&mut socket).await?;
                if state.store.lock().await.remove(&key).is_some() {
                    reply.push(0);
                } else {
                    reply.push(1);
                }
            }
            // get
            0x30 => {
                let key = read_lp(&mut socket).await?;
                match state.store.lock().await.get(&key) {
                    Some(value) => {
                        reply.push(0);
                        put_lp(&mut reply, value);
                    }
                    None => reply.push(1),
                }
            }
            // mget
            0x31 => {
                let count = read_u32(&mut socket).await?;
                let mut keys = Vec::new();
                for _ in 0..count {
                    let klen = read_u32(&mut socket).await? as usize;
                    keys.push(read_bytes(&mut socket, klen).await?);
                }
                let store = state.store.lock().await;
                let found: Vec<_> = keys
                    .iter()
                    .filter_map(|k| store.get(k).map(|v| (k.clone(), v.clone())))
                    .collect();
                reply.push(0);
                reply.extend_from_slice(&(found.len() as u32).to_be_bytes());
                for (k, v) in found {
                    reply.extend_from_slice(&(k.len() as u32).to_be_bytes());
                    reply.extend_from_slice(&(v.len() as u32).to_be_bytes());
                    reply.extend_from_slice(&k);
                    reply.extend_from_slice(&v);
                }
            }
            // vsiz
            0x38 => {
                let key = read_lp(&mut socket).await?;
                match state.store.lock().await.get(&key) {
                    Some(value) => {
                        reply.push(0);
                        reply.extend_from_slice(&(value.len() as u32).to_be_bytes());
                    }
                    None => reply.push(1),
                }
            }
            // iterinit
            0x50 => {
                iter.keys = state.store.lock().await.keys().cloned().collect();
                iter.pos = 0;
                reply.push(0);
            }
            // iternext
            0x51 => {
                if iter.pos < iter.keys.len() {
                    reply.push(0);
                    put_lp(&mut reply, &iter.keys[iter.pos]);
                    iter.pos += 1;
                } else {
                    reply.push(1);
                }
            }
            // fwmkeys
            0x58 => {
                let plen = read_u32(&mut socket).await? as usize;
                let max = read_u32(&mut socket).await? as usize;
                let prefix = read_bytes(&mut socket, plen).await?;
                let store = state.store.lock().await;
                let keys: Vec<_> = store
                    .keys()
                    .filter(|k| k.starts_with(&prefix))
                    .take(max)
                    .cloned()
                    .collect();
                reply.push(0);
                reply.extend_from_slice(&(keys.len() as u32).to_be_bytes());
                for k in keys {
                    put_lp(&mut reply, &k);
                }
            }
            // addint
            0x60 => {
                let klen = read_u32(&mut socket).await? as usize;
                let num = read_u32(&mut socket).await? as i32;
                let key = read_bytes(&mut socket, klen).await?;
                let mut store = state.store.lock().await;
                let current = store
                    .get(&key)
                    .and_then(|v| <[u8; 4]>::try_from(v.as_slice()).ok())
                    .map(i32::from_le_bytes)
                    .unwrap_or(0);
                let sum = current.wrapping_add(num);
                store.insert(key, sum.to_le_bytes().to_vec());
                reply.push(0);
                reply.extend_from_slice(&(sum as u32).to_be_bytes());
            }
            // adddouble
            0x61 => {
                let klen = read_u32(&mut socket).await? as usize;
                let int_part = read_u64(&mut socket).await? as i64;
                let frac_part = read_u64(&mut socket).await? as i64;
                let key = read_bytes(&mut socket, klen).await?;
                let mut store = state.store.lock().await;
                let (cur_int, cur_frac) = store
                    .get(&key)
                    .filter(|v| v.len() == 16)
                    .map(|v| {
                        let mut int = [0u8; 8];
                        let mut frac = [0u8; 8];
                        int.copy_from_slice(&v[..8]);
                        frac.copy_from_slice(&v[8..]);
                        (i64::from_be_bytes(int), i64::from_be_bytes(frac))
                    })
                    .unwrap_or((0, 0));
                let mut sum_int = cur_int + int_part;
                let mut sum_frac = cur_frac + frac_part;
                if sum_frac >= 1_000_000_000_000 {
                    sum_int += 1;
                    sum_frac -= 1_000_000_000_000;
                }
                if sum_frac <= -1_000_000_000_000 {
                    sum_int -= 1;
                    sum_frac += 1_000_000_000_000;
                }
                let mut value = Vec::with_capacity(16);
                value.extend_from_slice(&sum_int.to_be_bytes());
                value.extend_from_slice(&sum_frac.to_be_bytes());
                store.insert(key, value.clone());
                reply.push(0);
                reply.extend_from_slice(&value);
            }
            // ext: replies with "func(key)=value"
            0x68 => {
                let flen = read_u32(&mut socket).await? as usize;
                let _opts = read_u32(&mut socket).await?;
                let klen = read_u32(&mut socket).await? as usize;
                let vlen = read_u32(&mut socket).await? as usize;
                let func = read_bytes(&mut socket, flen).await?;
                let key = read_bytes(&mut socket, klen).await?;
                let value = read_bytes(&mut socket, vlen).await?;
                let result = [&func[..], b"(", &key[..], b")=", &value[..]].concat();
                reply.push(0);
                put_lp(&mut reply, &result);
            }
            // sync
            0x70 => reply.push(0),
            // vanish
            0x72 => {
                state.store.lock().await.clear();
                reply.push(0);
            }
            // rnum
            0x80 => {
                let n = state.store.lock().await.len() as u64;
                reply.push(0);
                reply.extend_from_slice(&n.to_be_bytes());
            }
            // size
            0x81 => {
                let n: u64 = state
                    .store
                    .lock()
                    .await
                    .values()
                    .map(|v| v.len() as u64)
                    .sum();
                reply.push(0);
                reply.extend_from_slice(&n.to_be_bytes());
            }
            // stat
            0x88 => {
                let store = state.store.lock().await;
                let stat = format!("type\t{}\nrnum\t{}\n", state.dbtype, store.len());
                reply.push(0);
                put_lp(&mut reply, stat.as_bytes());
            }
            // misc
            0x90 => {
                let flen = read_u32(&mut socket).await? as usize;
                let _opts = read_u32(&mut socket).await?;
                let argc = read_u32(&mut socket).await? as usize;
                let func = read_bytes(&mut socket, flen).await?;
                let mut args = Vec::with_capacity(argc);
                for _ in 0..argc {
                    let len = read_u32(&mut socket).await? as usize;
                    args.push(read_bytes(&mut socket, len).await?);
                }
                let results = misc(&state, &func, args).await;
                reply.push(0);
                reply.extend_from_slice(&(results.len() as u32).to_be_bytes());
                for item in results {
                    put_lp(&mut reply, &item);
                }
            }
            other => panic!("test server does not implement opcode {other:#x}"),
        }
        if !reply.is_empty() {
            socket.write_all(&reply).await?;
        }
    }
}

async fn misc(state: &ServerState, func: &[u8], args: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
    match func {
        b"putlist" => {
            let mut store = state.store.lock().await;
            if state.dbtype == "table" {
                // [key, col0, val0, col1, val1, ..]
                let mut args = args.into_iter();
                let key = args.next().expect("putlist key");
                let columns: Vec<Vec<u8>> = args.collect();
                store.insert(key, columns.join(&0u8));
            } else {
                let mut args = args.into_iter();
                while let (Some(k), Some(v)) = (args.next(), args.next()) {
                    store.insert(k, v);
                }
            }
            Vec::new()
        }
        b"outlist" => {
            let mut store = state.store.lock().await;
            for key in args {
                store.remove(&key);
            }
            Vec::new()
        }
        b"getlist" => {
            let store = state.store.lock().await;
            let mut out = Vec::new();
            for key in args {
                if let Some(value) = store.get(&key) {
                    out.push(key);
                    out.push(value.clone());
                }
            }
            out
        }
        b"search" => {
            state.search_count.fetch_add(1, Ordering::SeqCst);
            search(state, args).await
        }
        other => panic!(
            "test server does not implement misc function {:?}",
            String::from_utf8_lossy(other)
        ),
    }
}

async fn search(state: &ServerState, args: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
    let mut conditions: Vec<(String, u32, String)> = Vec::new();
    let mut order: Option<(String, u32)> = None;
    let mut window: Option<(usize, usize)> = None;
    for arg in &args {
        let text = String::from_utf8(arg.clone()).expect("search arg utf8");
        let parts: Vec<&str> = text.split('\0').collect();
        match parts[0] {
            "addcond" => conditions.push((
                parts[1].to_string(),
                parts[2].parse().expect("cond op"),
                parts[3].to_string(),
            )),
            "setorder" => order = Some((parts[1].to_string(), parts[2].parse().expect("dir"))),
            "setlimit" => {
                window = Some((
                    parts[2].parse().expect("offset"),
                    parts[1].parse().expect("limit"),
                ));
            }
            other => panic!("unknown search arg {other}"),
        }
    }

    let store = state.store.lock().await;
    let mut hits: Vec<(Vec<u8>, BTreeMap<String, String>)> = store
        .iter()
        .filter_map(|(k, v)| parse_record(v).map(|cols| (k.clone(), cols)))
        .filter(|(_, cols)| {
            conditions.iter().all(|(column, op, expr)| {
                let Some(actual) = cols.get(column) else {
                    return false;
                };
                match op {
                    0 => actual == expr,
                    1 => actual.contains(expr.as_str()),
                    6 => expr.split(',').any(|t| t == actual.as_str()),
                    8 => parse_num(actual) == parse_num(expr),
                    9 => parse_num(actual) > parse_num(expr),
                    10 => parse_num(actual) >= parse_num(expr),
                    11 => parse_num(actual) < parse_num(expr),
                    12 => parse_num(actual) <= parse_num(expr),
                    14 => expr.split(',').any(|t| parse_num(t) == parse_num(actual)),
                    other => panic!("test server does not implement condition op {other}"),
                }
            })
        })
        .collect();

    if let Some((column, dir)) = order {
        hits.sort_by(|(_, a), (_, b)| {
            let a = a.get(&column).cloned().unwrap_or_default();
            let b = b.get(&column).cloned().unwrap_or_default();
            let ord = match dir {
                0 | 1 => a.cmp(&b),
                _ => parse_num(&a).total_cmp(&parse_num(&b)),
            };
            if dir == 1 || dir == 3 { ord.reverse() } else { ord }
        });
    }

    let keys: Vec<Vec<u8>> = hits.into_iter().map(|(k, _)| k).collect();
    match window {
        Some((offset, limit)) => keys.into_iter().skip(offset).take(limit).collect(),
        None => keys,
    }
}

fn parse_record(value: &[u8]) -> Option<BTreeMap<String, String>> {
    let text = String::from_utf8(value.to_vec()).ok()?;
    let tokens: Vec<&str> = text.split('\0').collect();
    if tokens.first().is_none_or(|t| t.is_empty()) || tokens.len() % 2 != 0 {
        return None;
    }
    Some(
        tokens
            .chunks(2)
            .map(|pair| (pair[0].to_string(), pair[1].to_string()))
            .collect(),
    )
}

fn parse_num(text: &str) -> f64 {
    text.parse().unwrap_or(0.0)
}

fn put_lp(reply: &mut Vec<u8>, data: &[u8]) {
    reply.extend_from_slice(&(data.len() as u32).to_be_bytes());
    reply.extend_from_slice(data);
}

async fn read_u32(socket: &mut TcpStream) -> std::io::Result<u32> {
    let mut word = [0u8; 4];
    socket.read_exact(&mut word).await?;
    Ok(u32::from_be_bytes(word))
}

async fn read_u64(socket: &mut TcpStream) -> std::io::Result<u64> {
    let mut word = [0u8; 8];
    socket.read_exact(&mut word).await?;
    Ok(u64::from_be_bytes(word))
}

async fn read_bytes(socket: &mut TcpStream, len: usize) -> std::io::Result<Vec<u8>> {
    let mut data = vec![0u8; len];
    socket.read_exact(&mut data).await?;
    Ok(data)
}

async fn read_lp(socket: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let len = read_u32(socket).await? as usize;
    read_bytes(socket, len).await
}

async fn read_kv(socket: &mut TcpStream) -> std::io::Result<(Vec<u8>, Vec<u8>)> {
    let klen = read_u32(socket).await? as usize;
    let vlen = read_u32(socket).await? as usize;
    let key = read_bytes(socket, klen).await?;
    let value = read_bytes(socket, vlen).await?;
    Ok((key, value))
}
