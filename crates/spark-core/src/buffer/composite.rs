use std::collections::VecDeque;

use super::ByteBuf;

/// 组合缓冲的分段列表。
///
/// # 设计背景（Why）
/// - 分段累积策略把每个入站缓冲作为一段挂到列表尾部，避免整段复制；
/// - 读取需要跨段透明进行，已读完的段立即出队，其存储随之释放。
///
/// # 契约说明（What）
/// - 列表中不保留空段：写入与读取路径都会调用 [`Composite::prune`]；
/// - 段数上限由 `max_components` 约束，超过上限时由 [`ByteBuf::add_component`]
///   借助分配器整合为单段。
pub(crate) struct Composite {
    pub(crate) components: VecDeque<ByteBuf>,
    pub(crate) max_components: usize,
    pub(crate) read_only: bool,
}

impl Composite {
    pub(crate) fn new(max_components: usize) -> Self {
        Self {
            components: VecDeque::new(),
            max_components: max_components.max(1),
            read_only: false,
        }
    }

    pub(crate) fn readable_bytes(&self) -> usize {
        self.components.iter().map(ByteBuf::readable_bytes).sum()
    }

    /// 丢弃已经读完的前缀段。
    pub(crate) fn prune(&mut self) {
        while self
            .components
            .front()
            .is_some_and(|front| !front.is_readable())
        {
            self.components.pop_front();
        }
    }

    pub(crate) fn chunk(&self) -> &[u8] {
        self.components
            .iter()
            .map(ByteBuf::chunk)
            .find(|chunk| !chunk.is_empty())
            .unwrap_or(&[])
    }

    /// 推进读指针；调用方已校验 `len <= readable_bytes()`。
    pub(crate) fn advance(&mut self, mut len: usize) {
        while len > 0 {
            let Some(front) = self.components.front_mut() else {
                break;
            };
            let step = front.readable_bytes().min(len);
            front.advance_unchecked(step);
            len -= step;
            self.prune();
        }
    }

    pub(crate) fn get_u8(&self, mut offset: usize) -> Option<u8> {
        for component in &self.components {
            let readable = component.readable_bytes();
            if offset < readable {
                return component.get_u8(offset).ok();
            }
            offset -= readable;
        }
        None
    }

    pub(crate) fn index_of(&self, needle: u8) -> Option<usize> {
        let mut base = 0;
        for component in &self.components {
            if let Some(pos) = component.index_of(needle) {
                return Some(base + pos);
            }
            base += component.readable_bytes();
        }
        None
    }

    /// 从读指针开始复制 `dst.len()` 字节，不移动读指针。
    pub(crate) fn peek_into(&self, dst: &mut [u8]) {
        let mut filled = 0;
        for component in &self.components {
            if filled == dst.len() {
                break;
            }
            filled += component.peek_into_prefix(&mut dst[filled..]);
        }
    }

    /// 零拷贝切出 `len` 字节：落在首段内时直接返回该段的切片，否则拼成新的组合缓冲。
    pub(crate) fn read_slice(&mut self, len: usize) -> Result<ByteBuf, super::BufferError> {
        if let Some(front) = self.components.front_mut()
            && front.readable_bytes() >= len
        {
            let slice = front.read_slice(len)?;
            self.prune();
            return Ok(slice);
        }

        let mut pieces = Composite::new(self.max_components);
        let mut remaining = len;
        while remaining > 0 {
            let Some(front) = self.components.front_mut() else {
                break;
            };
            let step = front.readable_bytes().min(remaining);
            pieces.components.push_back(front.read_slice(step)?);
            remaining -= step;
            self.prune();
        }
        Ok(ByteBuf::from_composite(pieces))
    }

    /// 为每个分段生成保留副本，副本与原段共享存活计数。
    pub(crate) fn retain(&mut self) -> Result<Composite, super::BufferError> {
        let mut components = VecDeque::with_capacity(self.components.len());
        for component in &mut self.components {
            components.push_back(component.retain()?);
        }
        Ok(Composite {
            components,
            max_components: self.max_components,
            read_only: self.read_only,
        })
    }
}
