use std::fmt;
use std::mem;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};

use super::composite::Composite;
use super::lease::{BufProbe, BufferRecycler, Lease};
use super::{BufferAllocator, BufferError};

/// 默认最大容量，与常见网络框架的 `Integer.MAX_VALUE` 上限对齐。
pub const DEFAULT_MAX_CAPACITY: usize = i32::MAX as usize;

/// 组合缓冲默认的分段上限。
pub const DEFAULT_MAX_COMPONENTS: usize = 16;

/// 缓冲当前所处的表示形态。
enum Repr {
    /// 可写：`buf[..reader]` 为已读前缀，`buf[reader..]` 为可读区间。
    Writable { buf: BytesMut, reader: usize },
    /// 只读：冻结后的共享视图，读指针即视图起点。
    ReadOnly(Bytes),
    /// 分段：按序排列的子缓冲。
    Composite(Composite),
    /// 已释放：任何读写都返回 [`BufferError::UseAfterFree`]。
    Released,
}

/// `ByteBuf` 是解码链路中流转的引用计数字节缓冲。
///
/// # 设计背景（Why）
/// - 入站字节块在“传输层 → 累积器 → 解码步骤 → 下游”之间转交，每一次转交都是
///   所有权移动；只有保留副本与组合分段需要共享存储，因此存活计数只在这些场景增长；
/// - 缓冲的每条退出路径（正常消费、解码失败、中途卸载、连接关闭）都必须恰好释放一次，
///   `Drop` 保证遗漏的显式释放同样生效。
///
/// # 逻辑解析（How）
/// - `repr` 在可写、只读、组合、已释放四种形态间迁移：写入只允许发生在可写态，
///   保留副本会把可写态冻结为只读态，使共享存储不再可变；
/// - `lease` 为共享租约，存活计数即 `Arc::strong_count`；最后一个持有者销毁时
///   租约通知 [`BufferRecycler`]，池化分配器借此回收 `BytesMut`；
/// - 零拷贝切片（[`ByteBuf::read_slice`]）与源缓冲共享租约，复制读取
///   （[`ByteBuf::read_bytes`]）则得到独立租约。
///
/// # 契约说明（What）
/// - 读取超过可读字节返回 [`BufferError::Underflow`]，读指针保持不变；
/// - [`ByteBuf::release`] 之后的一切读写返回 [`BufferError::UseAfterFree`]，
///   [`ByteBuf::ref_cnt`] 为 0；
/// - 相等性只比较可读内容，与形态、容量、读指针位置无关。
///
/// # 设计取舍（Trade-offs）
/// - 存活计数使用原子引用计数而非单线程计数，换取缓冲转交给其它线程的自由；
/// - 组合缓冲的写入以追加新分段的方式实现，不回填末段剩余空间，逻辑更简单。
pub struct ByteBuf {
    repr: Repr,
    lease: Option<Arc<Lease>>,
    max_capacity: usize,
}

impl ByteBuf {
    /// 创建空的可写堆缓冲。
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// 创建预留 `capacity` 字节的可写堆缓冲。
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_max_capacity(capacity, DEFAULT_MAX_CAPACITY)
    }

    /// 创建带最大容量约束的可写堆缓冲；初始容量不超过最大容量。
    pub fn with_max_capacity(initial: usize, max_capacity: usize) -> Self {
        Self::from_repr(
            Repr::Writable {
                buf: BytesMut::with_capacity(initial.min(max_capacity)),
                reader: 0,
            },
            None,
            max_capacity,
        )
    }

    /// 复制 `data` 构造可写堆缓冲。
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self::from_bytes_mut(BytesMut::from(data))
    }

    /// 接管 `BytesMut` 作为可写堆缓冲，已有内容全部视为可读。
    pub fn from_bytes_mut(buf: BytesMut) -> Self {
        Self::from_repr(Repr::Writable { buf, reader: 0 }, None, DEFAULT_MAX_CAPACITY)
    }

    /// 包装只读视图，常用于表示来自内核或其它层的不可变数据。
    pub fn read_only(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let max_capacity = bytes.len();
        Self::from_repr(Repr::ReadOnly(bytes), None, max_capacity)
    }

    /// 以池化存储构造缓冲，租约结束时通知 `recycler`。
    pub fn pooled(buf: BytesMut, recycler: Arc<dyn BufferRecycler>) -> Self {
        Self::from_repr(
            Repr::Writable { buf, reader: 0 },
            Some(recycler),
            DEFAULT_MAX_CAPACITY,
        )
    }

    /// 创建空的组合缓冲。
    pub fn composite(max_components: usize) -> Self {
        Self::from_composite(Composite::new(max_components))
    }

    pub(crate) fn from_composite(composite: Composite) -> Self {
        Self::from_repr(Repr::Composite(composite), None, DEFAULT_MAX_CAPACITY)
    }

    fn from_repr(
        repr: Repr,
        recycler: Option<Arc<dyn BufferRecycler>>,
        max_capacity: usize,
    ) -> Self {
        let capacity = match &repr {
            Repr::Writable { buf, .. } => buf.capacity(),
            Repr::ReadOnly(bytes) => bytes.len(),
            Repr::Composite(composite) => composite.readable_bytes(),
            Repr::Released => 0,
        };
        Self {
            repr,
            lease: Some(Lease::new(capacity, recycler)),
            max_capacity,
        }
    }

    /// 与当前缓冲共享租约的新句柄。
    fn share(&self, repr: Repr, max_capacity: usize) -> Self {
        Self {
            repr,
            lease: self.lease.clone(),
            max_capacity,
        }
    }

    fn ensure_live(&self) -> Result<(), BufferError> {
        if matches!(self.repr, Repr::Released) {
            Err(BufferError::UseAfterFree)
        } else {
            Ok(())
        }
    }

    fn ensure_readable(&self, requested: usize) -> Result<(), BufferError> {
        self.ensure_live()?;
        let readable = self.readable_bytes();
        if requested > readable {
            return Err(BufferError::Underflow {
                requested,
                readable,
            });
        }
        Ok(())
    }

    fn refresh_capacity(&self) {
        if let (Some(lease), Repr::Writable { buf, .. }) = (&self.lease, &self.repr) {
            lease.update_capacity(buf.capacity());
        }
    }

    // ---- 状态查询 ----

    /// 可读字节数（写指针减读指针）。
    pub fn readable_bytes(&self) -> usize {
        match &self.repr {
            Repr::Writable { buf, reader } => buf.len() - reader,
            Repr::ReadOnly(bytes) => bytes.len(),
            Repr::Composite(composite) => composite.readable_bytes(),
            Repr::Released => 0,
        }
    }

    /// 是否仍有可读字节。
    pub fn is_readable(&self) -> bool {
        self.readable_bytes() > 0
    }

    /// 当前容量；只读与组合形态等于可读字节数。
    pub fn capacity(&self) -> usize {
        match &self.repr {
            Repr::Writable { buf, .. } => buf.capacity(),
            Repr::ReadOnly(bytes) => bytes.len(),
            Repr::Composite(composite) => composite.readable_bytes(),
            Repr::Released => 0,
        }
    }

    /// 最大容量。
    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// 无需扩容即可写入的字节数。
    pub fn writable_bytes(&self) -> usize {
        match &self.repr {
            Repr::Writable { buf, .. } => buf.capacity() - buf.len(),
            _ => 0,
        }
    }

    /// 在最大容量约束下最多还能写入的字节数。
    pub fn max_writable_bytes(&self) -> usize {
        match &self.repr {
            Repr::Writable { buf, .. } => self.max_capacity.saturating_sub(buf.len()),
            Repr::Composite(composite) if !composite.read_only => self
                .max_capacity
                .saturating_sub(composite.readable_bytes()),
            _ => 0,
        }
    }

    /// 存活计数：共享同一租约的句柄数量，释放后为 0。
    pub fn ref_cnt(&self) -> usize {
        self.lease.as_ref().map_or(0, Arc::strong_count)
    }

    /// 是否已经释放。
    pub fn is_released(&self) -> bool {
        self.lease.is_none()
    }

    /// 获取存活计数的弱观察者。
    pub fn probe(&self) -> BufProbe {
        self.lease
            .as_ref()
            .map_or_else(BufProbe::released, BufProbe::new)
    }

    /// 是否拒绝写入。
    pub fn is_read_only(&self) -> bool {
        match &self.repr {
            Repr::ReadOnly(_) => true,
            Repr::Composite(composite) => composite.read_only,
            _ => false,
        }
    }

    /// 是否为组合缓冲。
    pub fn is_composite(&self) -> bool {
        matches!(self.repr, Repr::Composite(_))
    }

    /// 可读区间是否位于一块连续内存中。
    pub fn is_contiguous(&self) -> bool {
        match &self.repr {
            Repr::Composite(composite) => composite.components.len() <= 1,
            _ => true,
        }
    }

    /// 分段数量；非组合缓冲视为 1 段，已释放为 0。
    pub fn num_components(&self) -> usize {
        match &self.repr {
            Repr::Composite(composite) => composite.components.len(),
            Repr::Released => 0,
            _ => 1,
        }
    }

    // ---- 读取 ----

    /// 首个连续可读块；组合缓冲只返回首段。
    pub fn chunk(&self) -> &[u8] {
        match &self.repr {
            Repr::Writable { buf, reader } => &buf[*reader..],
            Repr::ReadOnly(bytes) => &bytes[..],
            Repr::Composite(composite) => composite.chunk(),
            Repr::Released => &[],
        }
    }

    /// 读取 `offset` 处的字节（相对读指针），不移动读指针。
    pub fn get_u8(&self, offset: usize) -> Result<u8, BufferError> {
        self.ensure_readable(offset + 1)?;
        let byte = match &self.repr {
            Repr::Composite(composite) => composite.get_u8(offset),
            _ => self.chunk().get(offset).copied(),
        };
        byte.ok_or(BufferError::Underflow {
            requested: offset + 1,
            readable: self.readable_bytes(),
        })
    }

    /// 读取一个字节并前移读指针。
    pub fn read_u8(&mut self) -> Result<u8, BufferError> {
        let byte = self.get_u8(0)?;
        self.advance_unchecked(1);
        Ok(byte)
    }

    /// 跳过 `len` 字节。
    pub fn skip_bytes(&mut self, len: usize) -> Result<(), BufferError> {
        self.ensure_readable(len)?;
        self.advance_unchecked(len);
        Ok(())
    }

    /// 零拷贝切出 `len` 字节并前移读指针。
    ///
    /// # 契约说明（What）
    /// - 返回的切片为只读视图，与源缓冲共享租约，因此源缓冲的存活计数随之加一；
    /// - 组合缓冲跨段切片时返回由各段切片组成的新组合缓冲；
    /// - `len` 超过可读字节时返回 [`BufferError::Underflow`]，读指针不变。
    pub fn read_slice(&mut self, len: usize) -> Result<ByteBuf, BufferError> {
        self.ensure_readable(len)?;
        let slice_repr = match &mut self.repr {
            Repr::Writable { buf, reader } => {
                let head = buf.split_to(*reader + len).freeze();
                let slice = head.slice(*reader..);
                *reader = 0;
                Repr::ReadOnly(slice)
            }
            Repr::ReadOnly(bytes) => Repr::ReadOnly(bytes.split_to(len)),
            Repr::Composite(composite) => return composite.read_slice(len),
            Repr::Released => return Err(BufferError::UseAfterFree),
        };
        self.refresh_capacity();
        Ok(self.share(slice_repr, len))
    }

    /// 复制 `len` 字节到独立的新缓冲并前移读指针。
    pub fn read_bytes(&mut self, len: usize) -> Result<ByteBuf, BufferError> {
        self.ensure_readable(len)?;
        let mut copy = BytesMut::with_capacity(len);
        copy.resize(len, 0);
        self.peek_into(&mut copy);
        self.advance_unchecked(len);
        Ok(ByteBuf::from_bytes_mut(copy))
    }

    /// 复制 `len` 字节到 `Vec` 并前移读指针。
    pub fn read_to_vec(&mut self, len: usize) -> Result<Vec<u8>, BufferError> {
        self.ensure_readable(len)?;
        let mut out = vec![0; len];
        self.peek_into(&mut out);
        self.advance_unchecked(len);
        Ok(out)
    }

    /// 填满 `dst` 并前移读指针。
    pub fn copy_to_slice(&mut self, dst: &mut [u8]) -> Result<(), BufferError> {
        self.ensure_readable(dst.len())?;
        self.peek_into(dst);
        self.advance_unchecked(dst.len());
        Ok(())
    }

    /// 查找 `needle` 首次出现的位置（相对读指针）。
    pub fn index_of(&self, needle: u8) -> Option<usize> {
        match &self.repr {
            Repr::Composite(composite) => composite.index_of(needle),
            _ => self.chunk().iter().position(|byte| *byte == needle),
        }
    }

    /// 复制全部可读字节，不移动读指针。
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0; self.readable_bytes()];
        self.peek_into(&mut out);
        out
    }

    /// 从读指针开始复制 `dst.len()` 字节；调用方已校验长度。
    fn peek_into(&self, dst: &mut [u8]) {
        match &self.repr {
            Repr::Composite(composite) => composite.peek_into(dst),
            _ => {
                let len = dst.len();
                dst.copy_from_slice(&self.chunk()[..len]);
            }
        }
    }

    /// 复制不超过 `dst.len()` 的可读前缀，返回复制的字节数。
    pub(crate) fn peek_into_prefix(&self, dst: &mut [u8]) -> usize {
        let len = dst.len().min(self.readable_bytes());
        self.peek_into(&mut dst[..len]);
        len
    }

    /// 前移读指针；调用方已校验 `len <= readable_bytes()`。
    pub(crate) fn advance_unchecked(&mut self, len: usize) {
        match &mut self.repr {
            Repr::Writable { reader, .. } => *reader += len,
            Repr::ReadOnly(bytes) => bytes.advance(len),
            Repr::Composite(composite) => composite.advance(len),
            Repr::Released => {}
        }
    }

    // ---- 写入 ----

    /// 确保还能写入 `additional` 字节，必要时扩容。
    pub fn ensure_writable(&mut self, additional: usize) -> Result<(), BufferError> {
        let max_capacity = self.max_capacity;
        match &mut self.repr {
            Repr::Writable { buf, .. } => {
                if buf.len() + additional > max_capacity {
                    return Err(BufferError::CapacityExceeded {
                        requested: additional,
                        length: buf.len(),
                        max_capacity,
                    });
                }
                if buf.capacity() - buf.len() < additional {
                    buf.reserve(additional);
                }
            }
            Repr::Composite(composite) if !composite.read_only => {
                let length = composite.readable_bytes();
                if length + additional > max_capacity {
                    return Err(BufferError::CapacityExceeded {
                        requested: additional,
                        length,
                        max_capacity,
                    });
                }
            }
            Repr::Released => return Err(BufferError::UseAfterFree),
            _ => return Err(BufferError::ReadOnly),
        }
        self.refresh_capacity();
        Ok(())
    }

    /// 追加一个字节。
    pub fn write_u8(&mut self, value: u8) -> Result<(), BufferError> {
        self.write_bytes(&[value])
    }

    /// 追加 `src`。组合缓冲把 `src` 复制为新的尾段。
    pub fn write_bytes(&mut self, src: &[u8]) -> Result<(), BufferError> {
        self.ensure_writable(src.len())?;
        if src.is_empty() {
            return Ok(());
        }
        match &mut self.repr {
            Repr::Writable { buf, .. } => buf.extend_from_slice(src),
            Repr::Composite(composite) => composite
                .components
                .push_back(ByteBuf::copy_from_slice(src)),
            Repr::ReadOnly(_) => return Err(BufferError::ReadOnly),
            Repr::Released => return Err(BufferError::UseAfterFree),
        }
        self.refresh_capacity();
        Ok(())
    }

    /// 把 `src` 的全部可读字节转移到当前缓冲，`src` 读指针随之走到末尾。
    ///
    /// 组合缓冲以零拷贝切片的方式接收，其余形态逐块复制。
    pub fn write_buf(&mut self, src: &mut ByteBuf) -> Result<(), BufferError> {
        src.ensure_live()?;
        let len = src.readable_bytes();
        self.ensure_writable(len)?;
        if len == 0 {
            return Ok(());
        }
        match &mut self.repr {
            Repr::Writable { buf, .. } => {
                while src.is_readable() {
                    let chunk = src.chunk();
                    let step = chunk.len();
                    buf.extend_from_slice(chunk);
                    src.advance_unchecked(step);
                }
            }
            Repr::Composite(composite) => {
                composite.components.push_back(src.read_slice(len)?);
            }
            Repr::ReadOnly(_) => return Err(BufferError::ReadOnly),
            Repr::Released => return Err(BufferError::UseAfterFree),
        }
        self.refresh_capacity();
        Ok(())
    }

    /// 丢弃已读前缀，把可读区间搬到缓冲起点，释放出可写空间。
    pub fn discard_read_bytes(&mut self) {
        match &mut self.repr {
            Repr::Writable { buf, reader } if *reader > 0 => {
                let len = buf.len();
                buf.copy_within(*reader..len, 0);
                buf.truncate(len - *reader);
                *reader = 0;
            }
            Repr::Composite(composite) => composite.prune(),
            _ => {}
        }
    }

    /// 清空可读内容。
    pub fn clear(&mut self) {
        match &mut self.repr {
            Repr::Writable { buf, reader } => {
                buf.clear();
                *reader = 0;
            }
            Repr::ReadOnly(bytes) => bytes.clear(),
            Repr::Composite(composite) => composite.components.clear(),
            Repr::Released => {}
        }
    }

    // ---- 形态转换与存活计数 ----

    /// 转换为只读缓冲，保留租约与可读内容。
    pub fn as_read_only(mut self) -> ByteBuf {
        self.freeze_in_place();
        if let Repr::Composite(composite) = &mut self.repr {
            composite.read_only = true;
        }
        self
    }

    /// 生成共享存储的保留副本，存活计数加一。
    ///
    /// # 契约说明（What）
    /// - 副本拥有独立读指针，初始可读内容与当前缓冲一致；
    /// - 可写缓冲在此被冻结为只读，共享存储此后不再可变；
    /// - 已释放缓冲返回 [`BufferError::UseAfterFree`]。
    pub fn retain(&mut self) -> Result<ByteBuf, BufferError> {
        self.freeze_in_place();
        let duplicate = match &mut self.repr {
            Repr::ReadOnly(bytes) => Repr::ReadOnly(bytes.clone()),
            Repr::Composite(composite) => Repr::Composite(composite.retain()?),
            // freeze_in_place 之后不会再出现可写态
            Repr::Writable { .. } | Repr::Released => return Err(BufferError::UseAfterFree),
        };
        Ok(self.share(duplicate, self.max_capacity))
    }

    /// 把可写态冻结为只读态，可读内容保持不变。
    fn freeze_in_place(&mut self) {
        if !matches!(self.repr, Repr::Writable { .. }) {
            return;
        }
        if let Repr::Writable { buf, reader } = mem::replace(&mut self.repr, Repr::Released) {
            self.repr = Repr::ReadOnly(buf.freeze().slice(reader..));
        }
    }

    /// 释放当前句柄。
    ///
    /// 返回 `true` 表示这是最后一个持有者、存储已经归还；重复释放返回 `false`。
    pub fn release(&mut self) -> bool {
        let Some(lease) = self.lease.take() else {
            return false;
        };
        let repr = mem::replace(&mut self.repr, Repr::Released);
        if lease.wants_storage() {
            lease.store_buffer(reclaim_storage(repr));
        }
        Arc::strong_count(&lease) == 1
    }

    /// 向组合缓冲追加一段，所有权随之转移。
    ///
    /// # 逻辑解析（How）
    /// - 空段直接丢弃；
    /// - 段数达到上限时先向 `alloc` 申请一块能容纳全部内容的缓冲，把现有分段与新段
    ///   复制进去后替换为单段；申请失败时组合缓冲保持原样。
    ///
    /// # 契约说明（What）
    /// - 任何失败路径上 `component` 都会在返回前被释放；
    /// - 非组合缓冲返回 [`BufferError::NotComposite`]，只读组合返回 [`BufferError::ReadOnly`]。
    pub fn add_component(
        &mut self,
        alloc: &dyn BufferAllocator,
        mut component: ByteBuf,
    ) -> Result<(), BufferError> {
        component.ensure_live()?;
        let max_capacity = self.max_capacity;
        let composite = match &mut self.repr {
            Repr::Composite(composite) => composite,
            Repr::Released => return Err(BufferError::UseAfterFree),
            _ => {
                return Err(BufferError::NotComposite {
                    op: "add_component",
                });
            }
        };
        if composite.read_only {
            return Err(BufferError::ReadOnly);
        }
        if !component.is_readable() {
            return Ok(());
        }
        let length = composite.readable_bytes();
        let total = length + component.readable_bytes();
        if total > max_capacity {
            return Err(BufferError::CapacityExceeded {
                requested: component.readable_bytes(),
                length,
                max_capacity,
            });
        }
        if composite.components.len() < composite.max_components {
            composite.components.push_back(component);
            return Ok(());
        }

        let mut merged = alloc.allocate(total)?;
        if merged.max_writable_bytes() < total {
            return Err(BufferError::CapacityExceeded {
                requested: total,
                length: 0,
                max_capacity: merged.max_capacity(),
            });
        }
        for mut part in composite.components.drain(..) {
            merged.write_buf(&mut part)?;
        }
        merged.write_buf(&mut component)?;
        composite.components.push_back(merged);
        Ok(())
    }
}

/// 尝试从即将销毁的形态中夺回 `BytesMut`，供池化分配器复用。
fn reclaim_storage(repr: Repr) -> Option<BytesMut> {
    match repr {
        Repr::Writable { mut buf, .. } => {
            buf.clear();
            Some(buf)
        }
        Repr::ReadOnly(bytes) => bytes.try_into_mut().ok().map(|mut buf| {
            buf.clear();
            buf
        }),
        Repr::Composite(_) | Repr::Released => None,
    }
}

impl Drop for ByteBuf {
    fn drop(&mut self) {
        self.release();
    }
}

impl Default for ByteBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&[u8]> for ByteBuf {
    fn from(data: &[u8]) -> Self {
        Self::copy_from_slice(data)
    }
}

impl From<Vec<u8>> for ByteBuf {
    fn from(data: Vec<u8>) -> Self {
        Self::copy_from_slice(&data)
    }
}

impl From<BytesMut> for ByteBuf {
    fn from(buf: BytesMut) -> Self {
        Self::from_bytes_mut(buf)
    }
}

impl PartialEq for ByteBuf {
    fn eq(&self, other: &Self) -> bool {
        if self.is_contiguous() && other.is_contiguous() {
            self.chunk() == other.chunk()
        } else {
            self.to_vec() == other.to_vec()
        }
    }
}

impl Eq for ByteBuf {}

impl PartialEq<[u8]> for ByteBuf {
    fn eq(&self, other: &[u8]) -> bool {
        if self.is_contiguous() {
            self.chunk() == other
        } else {
            self.to_vec() == other
        }
    }
}

impl PartialEq<&[u8]> for ByteBuf {
    fn eq(&self, other: &&[u8]) -> bool {
        *self == **other
    }
}

impl fmt::Debug for ByteBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.repr {
            Repr::Writable { .. } => "writable",
            Repr::ReadOnly(_) => "read_only",
            Repr::Composite(_) => "composite",
            Repr::Released => "released",
        };
        f.debug_struct("ByteBuf")
            .field("kind", &kind)
            .field("readable_bytes", &self.readable_bytes())
            .field("capacity", &self.capacity())
            .field("ref_cnt", &self.ref_cnt())
            .finish()
    }
}
