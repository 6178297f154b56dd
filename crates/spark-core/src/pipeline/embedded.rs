use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use crate::buffer::{BufferAllocator, ByteBuf, HeapAllocator};
use crate::error::CoreError;

use super::{Context, InboundHandler, PipelineMessage, UserEvent};

/// 链路末端观察到的事件，按发生顺序记录。
///
/// - `Read`：一条消息抵达末端并进入入站队列；
/// - `ReadComplete`：读批次完成，`channel_active` 记录事件发生时的连接状态；
/// - `ChannelInactive`：连接失活；
/// - `UserEvent`：用户事件标签；
/// - `Error`：未被任何 Handler 处理的错误码。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TailEvent {
    Read,
    ReadComplete { channel_active: bool },
    ChannelInactive,
    UserEvent(String),
    Error(&'static str),
}

/// `EmbeddedChannel` 是完全位于内存中的单连接 Handler 链。
///
/// # 设计背景（Why）
/// - 解码器的大部分契约（重入摘除、关闭收尾、缓冲释放）只能在真实链路语义下验证，
///   内嵌链路提供同样的事件顺序而无需事件循环与网络；
/// - 示例与集成测试都通过它驱动 Handler，断言末端收到的消息与事件。
///
/// # 逻辑解析（How）
/// - Handler 按 `add_last` 的顺序存放，每个条目记录名称、`RefCell` 包裹的 Handler
///   与“已摘除”标记；摘除只打标记，条目保留在原位置，已摘除上下文的转发目标
///   仍是其原位置之后的第一个在链 Handler；
/// - 事件派发期间 `depth` 大于 0，此时发生的摘除把 `handler_removed` 回调放入待办，
///   在最外层事件传播结束后统一执行，保证回调不会与 Handler 自身的执行重叠；
/// - 末端把消息放入入站队列、错误放入错误列表，并把所有事件记录到 [`TailEvent`] 日志。
///
/// # 契约说明（What）
/// - `write_inbound` 依次派发一条读事件与一个读批次完成事件，返回入站队列是否非空；
/// - `finish` 标记连接失活、派发失活事件，随后按顺序摘除全部 Handler；
/// - 所有状态只在创建线程上访问，类型本身不是 `Send`。
pub struct EmbeddedChannel {
    shared: Rc<Shared>,
}

struct Shared {
    entries: RefCell<Vec<Rc<Entry>>>,
    inbound: RefCell<VecDeque<PipelineMessage>>,
    errors: RefCell<Vec<CoreError>>,
    events: RefCell<Vec<TailEvent>>,
    pending_removals: RefCell<Vec<(usize, Rc<Entry>)>>,
    depth: Cell<usize>,
    active: Cell<bool>,
    allocator: Arc<dyn BufferAllocator>,
}

struct Entry {
    name: String,
    handler: RefCell<Box<dyn InboundHandler>>,
    removed: Cell<bool>,
}

enum Event {
    Read(PipelineMessage),
    ReadComplete,
    ChannelInactive,
    UserEvent(UserEvent),
    Error(CoreError),
}

struct EntryContext {
    shared: Rc<Shared>,
    entry: Rc<Entry>,
    index: usize,
}

impl EmbeddedChannel {
    /// 使用堆分配器创建空链路。
    pub fn new() -> Self {
        Self::with_allocator(Arc::new(HeapAllocator))
    }

    /// 使用指定分配器创建空链路。
    pub fn with_allocator(allocator: Arc<dyn BufferAllocator>) -> Self {
        Self {
            shared: Rc::new(Shared {
                entries: RefCell::new(Vec::new()),
                inbound: RefCell::new(VecDeque::new()),
                errors: RefCell::new(Vec::new()),
                events: RefCell::new(Vec::new()),
                pending_removals: RefCell::new(Vec::new()),
                depth: Cell::new(0),
                active: Cell::new(true),
                allocator,
            }),
        }
    }

    /// 在链路末尾追加 Handler 并触发 `handler_added`。
    pub fn add_last(
        &self,
        name: impl Into<String>,
        handler: impl InboundHandler + 'static,
    ) -> &Self {
        let entry = Rc::new(Entry {
            name: name.into(),
            handler: RefCell::new(Box::new(handler)),
            removed: Cell::new(false),
        });
        let index = {
            let mut entries = self.shared.entries.borrow_mut();
            entries.push(Rc::clone(&entry));
            entries.len() - 1
        };
        let ctx = EntryContext {
            shared: Rc::clone(&self.shared),
            entry: Rc::clone(&entry),
            index,
        };
        // 回调内的自我摘除同样推迟到回调返回之后
        self.shared.depth.set(self.shared.depth.get() + 1);
        entry.handler.borrow_mut().handler_added(&ctx);
        self.shared.depth.set(self.shared.depth.get() - 1);
        if self.shared.depth.get() == 0 {
            run_pending_removals(&self.shared);
        }
        self
    }

    /// 派发一条读事件与一个读批次完成事件，返回入站队列是否非空。
    pub fn write_inbound(&self, msg: impl Into<PipelineMessage>) -> bool {
        self.fire_read(msg);
        self.fire_read_complete();
        !self.shared.inbound.borrow().is_empty()
    }

    /// 依次派发多条读事件，最后派发一个读批次完成事件。
    pub fn write_inbound_all<I, M>(&self, msgs: I) -> bool
    where
        I: IntoIterator<Item = M>,
        M: Into<PipelineMessage>,
    {
        for msg in msgs {
            self.fire_read(msg);
        }
        self.fire_read_complete();
        !self.shared.inbound.borrow().is_empty()
    }

    /// 只派发读事件。
    pub fn fire_read(&self, msg: impl Into<PipelineMessage>) {
        fire(&self.shared, 0, Event::Read(msg.into()));
    }

    /// 只派发读批次完成事件。
    pub fn fire_read_complete(&self) {
        fire(&self.shared, 0, Event::ReadComplete);
    }

    /// 派发用户事件。
    pub fn fire_user_event(&self, event: UserEvent) {
        fire(&self.shared, 0, Event::UserEvent(event));
    }

    /// 模拟对端半关闭输入方向。
    pub fn shutdown_input(&self) {
        self.fire_user_event(UserEvent::InputShutdown);
    }

    /// 关闭连接：派发失活事件并摘除全部 Handler，返回入站队列是否非空。
    pub fn finish(&self) -> bool {
        if self.shared.active.replace(false) {
            fire(&self.shared, 0, Event::ChannelInactive);
        }
        let live: Vec<(usize, Rc<Entry>)> = self
            .shared
            .entries
            .borrow()
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.removed.get())
            .map(|(index, entry)| (index, Rc::clone(entry)))
            .collect();
        for (index, entry) in live {
            remove_entry(&self.shared, index, &entry);
        }
        !self.shared.inbound.borrow().is_empty()
    }

    /// 关闭连接并释放入站队列中的全部消息，返回关闭前队列是否非空。
    pub fn finish_and_release_all(&self) -> bool {
        let has_inbound = self.finish();
        self.shared.inbound.borrow_mut().clear();
        has_inbound
    }

    /// 取出入站队列头部的消息。
    pub fn read_inbound(&self) -> Option<PipelineMessage> {
        self.shared.inbound.borrow_mut().pop_front()
    }

    /// 队列头部为字节缓冲时取出它。
    pub fn read_inbound_buf(&self) -> Option<ByteBuf> {
        let mut inbound = self.shared.inbound.borrow_mut();
        match inbound.pop_front()?.into_buffer() {
            Ok(buf) => Some(buf),
            Err(other) => {
                inbound.push_front(other);
                None
            }
        }
    }

    /// 队列头部为 `T` 类型业务消息时取出它。
    pub fn read_inbound_user<T: Any>(&self) -> Option<T> {
        let mut inbound = self.shared.inbound.borrow_mut();
        match inbound.pop_front()?.downcast_user::<T>() {
            Ok(value) => Some(value),
            Err(other) => {
                inbound.push_front(other);
                None
            }
        }
    }

    /// 入站队列长度。
    pub fn inbound_len(&self) -> usize {
        self.shared.inbound.borrow().len()
    }

    /// 取出末端收集到的全部错误。
    pub fn take_errors(&self) -> Vec<CoreError> {
        std::mem::take(&mut *self.shared.errors.borrow_mut())
    }

    /// 若末端收集到错误，返回第一个并丢弃其余。
    pub fn check_error(&self) -> Result<(), CoreError> {
        let mut errors = self.take_errors().into_iter();
        match errors.next() {
            Some(first) => Err(first),
            None => Ok(()),
        }
    }

    /// 按名称摘除 Handler，返回是否找到。
    pub fn remove(&self, name: &str) -> bool {
        remove_by_name(&self.shared, name)
    }

    /// 链路中是否存在指定名称的 Handler。
    pub fn contains(&self, name: &str) -> bool {
        find_live(&self.shared, name).is_some()
    }

    /// 末端事件日志快照。
    pub fn tail_events(&self) -> Vec<TailEvent> {
        self.shared.events.borrow().clone()
    }

    /// 连接是否活跃。
    pub fn is_active(&self) -> bool {
        self.shared.active.get()
    }

    /// 连接共享的分配器。
    pub fn allocator(&self) -> Arc<dyn BufferAllocator> {
        Arc::clone(&self.shared.allocator)
    }
}

impl Default for EmbeddedChannel {
    fn default() -> Self {
        Self::new()
    }
}

fn fire(shared: &Rc<Shared>, from: usize, event: Event) {
    let target = shared
        .entries
        .borrow()
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, entry)| !entry.removed.get())
        .map(|(index, entry)| (index, Rc::clone(entry)));

    let Some((index, entry)) = target else {
        deliver_to_tail(shared, event);
        return;
    };

    let ctx = EntryContext {
        shared: Rc::clone(shared),
        entry: Rc::clone(&entry),
        index,
    };
    shared.depth.set(shared.depth.get() + 1);
    {
        match entry.handler.try_borrow_mut() {
            Ok(mut handler) => dispatch(&mut **handler, &ctx, event),
            // 事件只向下游传播，正在执行的 Handler 不可能再次成为目标；防御性地跳过它。
            Err(_) => fire(shared, index + 1, event),
        }
    }
    shared.depth.set(shared.depth.get() - 1);
    if shared.depth.get() == 0 {
        run_pending_removals(shared);
    }
}

fn dispatch(handler: &mut dyn InboundHandler, ctx: &EntryContext, event: Event) {
    match event {
        Event::Read(msg) => handler.on_read(ctx, msg),
        Event::ReadComplete => handler.on_read_complete(ctx),
        Event::ChannelInactive => handler.on_channel_inactive(ctx),
        Event::UserEvent(event) => handler.on_user_event(ctx, event),
        Event::Error(error) => handler.on_exception_caught(ctx, error),
    }
}

fn deliver_to_tail(shared: &Shared, event: Event) {
    let tail_event = match event {
        Event::Read(msg) => {
            shared.inbound.borrow_mut().push_back(msg);
            TailEvent::Read
        }
        Event::ReadComplete => TailEvent::ReadComplete {
            channel_active: shared.active.get(),
        },
        Event::ChannelInactive => TailEvent::ChannelInactive,
        Event::UserEvent(event) => TailEvent::UserEvent(event.label().to_owned()),
        Event::Error(error) => {
            let code = error.code();
            shared.errors.borrow_mut().push(error);
            TailEvent::Error(code)
        }
    };
    shared.events.borrow_mut().push(tail_event);
}

fn find_live(shared: &Shared, name: &str) -> Option<(usize, Rc<Entry>)> {
    shared
        .entries
        .borrow()
        .iter()
        .enumerate()
        .find(|(_, entry)| !entry.removed.get() && entry.name == name)
        .map(|(index, entry)| (index, Rc::clone(entry)))
}

fn remove_by_name(shared: &Rc<Shared>, name: &str) -> bool {
    match find_live(shared, name) {
        Some((index, entry)) => {
            remove_entry(shared, index, &entry);
            true
        }
        None => false,
    }
}

fn remove_entry(shared: &Rc<Shared>, index: usize, entry: &Rc<Entry>) {
    if entry.removed.replace(true) {
        return;
    }
    tracing::debug!(handler = %entry.name, "handler removed from embedded pipeline");
    shared
        .pending_removals
        .borrow_mut()
        .push((index, Rc::clone(entry)));
    if shared.depth.get() == 0 {
        run_pending_removals(shared);
    }
}

fn run_pending_removals(shared: &Rc<Shared>) {
    loop {
        let next = {
            let mut pending = shared.pending_removals.borrow_mut();
            if pending.is_empty() {
                None
            } else {
                Some(pending.remove(0))
            }
        };
        let Some((index, entry)) = next else {
            break;
        };
        let ctx = EntryContext {
            shared: Rc::clone(shared),
            entry: Rc::clone(&entry),
            index,
        };
        shared.depth.set(shared.depth.get() + 1);
        if let Ok(mut handler) = entry.handler.try_borrow_mut() {
            handler.handler_removed(&ctx);
        }
        shared.depth.set(shared.depth.get() - 1);
    }
}

impl Context for EntryContext {
    fn name(&self) -> &str {
        &self.entry.name
    }

    fn allocator(&self) -> Arc<dyn BufferAllocator> {
        Arc::clone(&self.shared.allocator)
    }

    fn forward_read(&self, msg: PipelineMessage) {
        fire(&self.shared, self.index + 1, Event::Read(msg));
    }

    fn forward_read_complete(&self) {
        fire(&self.shared, self.index + 1, Event::ReadComplete);
    }

    fn forward_channel_inactive(&self) {
        fire(&self.shared, self.index + 1, Event::ChannelInactive);
    }

    fn forward_user_event(&self, event: UserEvent) {
        fire(&self.shared, self.index + 1, Event::UserEvent(event));
    }

    fn notify_error(&self, error: CoreError) {
        fire(&self.shared, self.index + 1, Event::Error(error));
    }

    fn remove_self(&self) {
        remove_entry(&self.shared, self.index, &self.entry);
    }

    fn remove(&self, name: &str) -> bool {
        remove_by_name(&self.shared, name)
    }

    fn is_removed(&self) -> bool {
        self.entry.removed.get()
    }

    fn is_channel_active(&self) -> bool {
        self.shared.active.get()
    }
}
