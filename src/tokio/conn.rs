use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::instrument;

use crate::constant::{CommandByte, ExtFlags, MiscFlags};
use crate::error::{Error, Result};
use crate::protocol::frame::{Arg, len_u32, write_frame};
use crate::protocol::primitive::{compose_double, split_double};
use crate::protocol::reply::{Reply, ReplyShape};
use crate::query::{Condition, Order, build_search_args};
use crate::record::utf8_owned;
use crate::tokio::transport::Transport;

/// A Tyrant connection.
///
/// All methods take `&self`: any number of tasks may issue commands on the
/// same connection concurrently and the transport pipelines them, delivering
/// each reply to the command that sent the matching request.
pub struct Conn {
    transport: Transport,
}

impl Conn {
    /// Connect to a Tyrant server.
    ///
    /// # Examples
    /// ```ignore
    /// // Using a URL string
    /// let conn = Conn::connect("tyrant://localhost:1978").await?;
    ///
    /// // Using an Opts struct
    /// let opts = Opts { host: "127.0.0.1".to_string(), ..Default::default() };
    /// let conn = Conn::connect(opts).await?;
    /// ```
    #[instrument(skip_all)]
    pub async fn connect<O: TryInto<crate::opts::Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts: crate::opts::Opts = opts.try_into()?;
        let addr = format!("{}:{}", opts.host, opts.port);
        let stream = TcpStream::connect(&addr).await?;
        stream.set_nodelay(opts.tcp_nodelay)?;
        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-established stream.
    ///
    /// Useful when socket options must be set up front, and for driving the
    /// client against an in-process stream in tests. There is no handshake;
    /// commands may start immediately.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self {
            transport: Transport::new(stream),
        }
    }

    async fn round_trip(
        &self,
        command: CommandByte,
        args: &[Arg<'_>],
        shape: ReplyShape,
    ) -> Result<Reply> {
        let mut frame = Vec::with_capacity(64);
        write_frame(&mut frame, command, args);
        self.transport.round_trip(frame, shape).await
    }

    /// Unconditionally set `key` to `value`.
    pub async fn put(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        let (key, value) = (key.as_ref(), value.as_ref());
        self.round_trip(
            CommandByte::Put,
            &[
                Arg::U32(len_u32(key)?),
                Arg::U32(len_u32(value)?),
                Arg::Bytes(key),
                Arg::Bytes(value),
            ],
            ReplyShape::Ack,
        )
        .await?;
        Ok(())
    }

    /// Set `key` to `value` only if `key` does not already exist.
    pub async fn putkeep(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        let (key, value) = (key.as_ref(), value.as_ref());
        self.round_trip(
            CommandByte::PutKeep,
            &[
                Arg::U32(len_u32(key)?),
                Arg::U32(len_u32(value)?),
                Arg::Bytes(key),
                Arg::Bytes(value),
            ],
            ReplyShape::Ack,
        )
        .await?;
        Ok(())
    }

    /// Append `value` to the existing value of `key`, creating it if absent.
    pub async fn putcat(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        let (key, value) = (key.as_ref(), value.as_ref());
        self.round_trip(
            CommandByte::PutCat,
            &[
                Arg::U32(len_u32(key)?),
                Arg::U32(len_u32(value)?),
                Arg::Bytes(key),
                Arg::Bytes(value),
            ],
            ReplyShape::Ack,
        )
        .await?;
        Ok(())
    }

    /// Append `value` and shift the record left, keeping the last `width`
    /// bytes.
    pub async fn putshl(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        width: u32,
    ) -> Result<()> {
        let (key, value) = (key.as_ref(), value.as_ref());
        self.round_trip(
            CommandByte::PutShl,
            &[
                Arg::U32(len_u32(key)?),
                Arg::U32(len_u32(value)?),
                Arg::U32(width),
                Arg::Bytes(key),
                Arg::Bytes(value),
            ],
            ReplyShape::Ack,
        )
        .await?;
        Ok(())
    }

    /// Set `key` to `value` without waiting for a server response.
    ///
    /// The server never replies to this command; the returned future
    /// resolves as soon as the frame is written.
    pub async fn putnr(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        let (key, value) = (key.as_ref(), value.as_ref());
        let mut frame = Vec::with_capacity(64);
        write_frame(
            &mut frame,
            CommandByte::PutNr,
            &[
                Arg::U32(len_u32(key)?),
                Arg::U32(len_u32(value)?),
                Arg::Bytes(key),
                Arg::Bytes(value),
            ],
        );
        self.transport.fire_and_forget(frame).await
    }

    /// Remove `key` from the server.
    pub async fn out(&self, key: impl AsRef<[u8]>) -> Result<()> {
        let key = key.as_ref();
        self.round_trip(
            CommandByte::Out,
            &[Arg::U32(len_u32(key)?), Arg::Bytes(key)],
            ReplyShape::Ack,
        )
        .await?;
        Ok(())
    }

    /// Get the value of `key` as text.
    pub async fn get(&self, key: impl AsRef<[u8]>) -> Result<String> {
        utf8_owned(self.get_raw(key).await?)
    }

    /// Get the value of `key` as raw bytes, with no decoding.
    pub async fn get_raw(&self, key: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        let key = key.as_ref();
        self.round_trip(
            CommandByte::Get,
            &[Arg::U32(len_u32(key)?), Arg::Bytes(key)],
            ReplyShape::Data,
        )
        .await?
        .into_data()
    }

    /// Read a counter previously managed by [`Conn::addint`].
    pub async fn get_int(&self, key: impl AsRef<[u8]>) -> Result<i32> {
        let data = self.get_raw(key).await?;
        let bytes: [u8; 4] = data
            .as_slice()
            .try_into()
            .map_err(|_| Error::Decode("counter value is not 4 bytes".to_string()))?;
        Ok(i32::from_le_bytes(bytes))
    }

    /// Read a counter previously managed by [`Conn::adddouble`].
    pub async fn get_double(&self, key: impl AsRef<[u8]>) -> Result<f64> {
        let data = self.get_raw(key).await?;
        if data.len() != 16 {
            return Err(Error::Decode("double value is not 16 bytes".to_string()));
        }
        let (int_part, rest) = crate::protocol::primitive::read_u64(&data)?;
        let (frac_part, _) = crate::protocol::primitive::read_u64(rest)?;
        Ok(compose_double(int_part, frac_part))
    }

    /// Get key/value pairs for the given keys. Missing keys are absent from
    /// the result; the order is decided by the server.
    pub async fn mget<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let count = u32::try_from(keys.len())
            .map_err(|_| Error::BadUsage("more than u32::MAX keys".to_string()))?;
        let items: Vec<&[u8]> = keys.iter().map(AsRef::as_ref).collect();
        self.round_trip(
            CommandByte::Mget,
            &[Arg::U32(count), Arg::List(&items)],
            ReplyShape::Pairs,
        )
        .await?
        .into_pairs()
    }

    /// Get the size of the value stored under `key`.
    pub async fn vsiz(&self, key: impl AsRef<[u8]>) -> Result<u32> {
        let key = key.as_ref();
        self.round_trip(
            CommandByte::Vsiz,
            &[Arg::U32(len_u32(key)?), Arg::Bytes(key)],
            ReplyShape::U32,
        )
        .await?
        .into_u32()
    }

    /// Begin iteration over all keys of the database.
    pub async fn iterinit(&self) -> Result<()> {
        self.round_trip(CommandByte::IterInit, &[], ReplyShape::Ack)
            .await?;
        Ok(())
    }

    /// Get the next key after [`Conn::iterinit`]; `None` when the iterator
    /// is exhausted.
    pub async fn iternext(&self) -> Result<Option<Vec<u8>>> {
        match self
            .round_trip(CommandByte::IterNext, &[], ReplyShape::Data)
            .await
        {
            Ok(reply) => Ok(Some(reply.into_data()?)),
            Err(Error::Server(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Get up to `max` keys starting with `prefix`.
    pub async fn fwmkeys(&self, prefix: impl AsRef<[u8]>, max: u32) -> Result<Vec<String>> {
        let prefix = prefix.as_ref();
        let items = self
            .round_trip(
                CommandByte::FwmKeys,
                &[Arg::U32(len_u32(prefix)?), Arg::U32(max), Arg::Bytes(prefix)],
                ReplyShape::List,
            )
            .await?
            .into_list()?;
        items.into_iter().map(utf8_owned).collect()
    }

    /// Add `num` to the integer counter under `key` and return the sum.
    pub async fn addint(&self, key: impl AsRef<[u8]>, num: i32) -> Result<i32> {
        let key = key.as_ref();
        let sum = self
            .round_trip(
                CommandByte::AddInt,
                &[
                    Arg::U32(len_u32(key)?),
                    Arg::U32(num as u32),
                    Arg::Bytes(key),
                ],
                ReplyShape::U32,
            )
            .await?
            .into_u32()?;
        Ok(sum as i32)
    }

    /// Add `num` to the double counter under `key` and return the sum.
    pub async fn adddouble(&self, key: impl AsRef<[u8]>, num: f64) -> Result<f64> {
        let key = key.as_ref();
        let (int_part, frac_part) = split_double(num);
        self.round_trip(
            CommandByte::AddDouble,
            &[
                Arg::U32(len_u32(key)?),
                Arg::U64(int_part),
                Arg::U64(frac_part),
                Arg::Bytes(key),
            ],
            ReplyShape::Double,
        )
        .await?
        .into_double()
    }

    /// Call the server-side script function `func(key, value)`.
    pub async fn ext(
        &self,
        func: &str,
        opts: ExtFlags,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Result<String> {
        let (key, value) = (key.as_ref(), value.as_ref());
        let func = func.as_bytes();
        let data = self
            .round_trip(
                CommandByte::Ext,
                &[
                    Arg::U32(len_u32(func)?),
                    Arg::U32(opts.bits()),
                    Arg::U32(len_u32(key)?),
                    Arg::U32(len_u32(value)?),
                    Arg::Bytes(func),
                    Arg::Bytes(key),
                    Arg::Bytes(value),
                ],
                ReplyShape::Data,
            )
            .await?
            .into_data()?;
        utf8_owned(data)
    }

    /// Synchronize updated content to storage.
    pub async fn sync(&self) -> Result<()> {
        self.round_trip(CommandByte::Sync, &[], ReplyShape::Ack)
            .await?;
        Ok(())
    }

    /// Remove all records.
    pub async fn vanish(&self) -> Result<()> {
        self.round_trip(CommandByte::Vanish, &[], ReplyShape::Ack)
            .await?;
        Ok(())
    }

    /// Hot-copy the database file to `path` on the server host.
    pub async fn copy(&self, path: &str) -> Result<()> {
        let path = path.as_bytes();
        self.round_trip(
            CommandByte::Copy,
            &[Arg::U32(len_u32(path)?), Arg::Bytes(path)],
            ReplyShape::Ack,
        )
        .await?;
        Ok(())
    }

    /// Restore the database from the update log at `path` since `ts`
    /// (microseconds).
    pub async fn restore(&self, path: &str, ts: u64) -> Result<()> {
        let path = path.as_bytes();
        self.round_trip(
            CommandByte::Restore,
            &[Arg::U32(len_u32(path)?), Arg::U64(ts), Arg::Bytes(path)],
            ReplyShape::Ack,
        )
        .await?;
        Ok(())
    }

    /// Set the replication master to `host:port`.
    pub async fn setmst(&self, host: &str, port: u32) -> Result<()> {
        let host = host.as_bytes();
        self.round_trip(
            CommandByte::SetMst,
            &[Arg::U32(len_u32(host)?), Arg::U32(port), Arg::Bytes(host)],
            ReplyShape::Ack,
        )
        .await?;
        Ok(())
    }

    /// Get the number of records.
    pub async fn rnum(&self) -> Result<u64> {
        self.round_trip(CommandByte::Rnum, &[], ReplyShape::U64)
            .await?
            .into_u64()
    }

    /// Get the size of the database in bytes.
    pub async fn size(&self) -> Result<u64> {
        self.round_trip(CommandByte::Size, &[], ReplyShape::U64)
            .await?
            .into_u64()
    }

    /// Get the status message of the database.
    pub async fn stat(&self) -> Result<String> {
        let data = self
            .round_trip(CommandByte::Stat, &[], ReplyShape::Data)
            .await?
            .into_data()?;
        utf8_owned(data)
    }

    /// Call a versatile function.
    ///
    /// All databases support `putlist`, `outlist` and `getlist`; table
    /// databases add `setindex`, `search` and `genuid`. Arguments and result
    /// elements are raw byte strings.
    pub async fn misc<A: AsRef<[u8]>>(
        &self,
        func: &str,
        args: &[A],
        opts: MiscFlags,
    ) -> Result<Vec<Vec<u8>>> {
        let func = func.as_bytes();
        let argc = u32::try_from(args.len())
            .map_err(|_| Error::BadUsage("more than u32::MAX arguments".to_string()))?;
        let items: Vec<&[u8]> = args.iter().map(AsRef::as_ref).collect();
        self.round_trip(
            CommandByte::Misc,
            &[
                Arg::U32(len_u32(func)?),
                Arg::U32(opts.bits()),
                Arg::U32(argc),
                Arg::Bytes(func),
                Arg::List(&items),
            ],
            ReplyShape::List,
        )
        .await?
        .into_list()
    }

    /// Search a table database and return the matching keys.
    ///
    /// `window` is `(offset, limit)`; pass `None` for an unbounded result.
    pub async fn search(
        &self,
        conditions: &[Condition],
        order: Option<&Order>,
        window: Option<(u32, u32)>,
        opts: MiscFlags,
    ) -> Result<Vec<String>> {
        let args = build_search_args(conditions, order, window);
        let keys = self.misc("search", &args, opts).await?;
        keys.into_iter().map(utf8_owned).collect()
    }
}
