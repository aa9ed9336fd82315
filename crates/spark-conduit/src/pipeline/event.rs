use std::{
    any::{Any, type_name},
    fmt,
    net::SocketAddr,
};

/// 类型擦除的事件负载。
///
/// Handler 之间只传递负载本身；解码类 Handler 通过 [`downcast`](Self::downcast) 取回具体类型，
/// 再以新的 `Message` 向后转发变换后的值。
pub struct Message {
    payload: Box<dyn Any + Send>,
    type_name: &'static str,
}

impl Message {
    pub fn new<T: Any + Send>(payload: T) -> Self {
        Self {
            payload: Box::new(payload),
            type_name: type_name::<T>(),
        }
    }

    pub fn is<T: Any>(&self) -> bool {
        self.payload.is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.payload.downcast_mut::<T>()
    }

    /// 取回具体类型；类型不符时原样交还。
    pub fn downcast<T: Any>(self) -> Result<T, Message> {
        let type_name = self.type_name;
        match self.payload.downcast::<T>() {
            Ok(payload) => Ok(*payload),
            Err(payload) => Err(Message { payload, type_name }),
        }
    }

    /// 负载的类型名，仅用于诊断。
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("type", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// 入站事件，自链头流向链尾。
#[derive(Debug)]
pub enum InboundEvent {
    /// 连接建立。
    Active,
    /// 连接断开。
    Inactive,
    /// 收到数据。
    Read(Message),
    /// 本轮读取结束。
    ReadComplete,
    /// 用户自定义事件。
    User(Message),
}

impl InboundEvent {
    pub fn read<T: Any + Send>(payload: T) -> Self {
        InboundEvent::Read(Message::new(payload))
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Active => "active",
            InboundEvent::Inactive => "inactive",
            InboundEvent::Read(_) => "read",
            InboundEvent::ReadComplete => "read_complete",
            InboundEvent::User(_) => "user",
        }
    }
}

/// 出站操作，自链尾流向链头，最终交给传输层。
#[derive(Debug)]
pub enum OutboundOp {
    Connect(SocketAddr),
    Write(Message),
    Flush,
    Close,
}

impl OutboundOp {
    pub fn write<T: Any + Send>(payload: T) -> Self {
        OutboundOp::Write(Message::new(payload))
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            OutboundOp::Connect(_) => "connect",
            OutboundOp::Write(_) => "write",
            OutboundOp::Flush => "flush",
            OutboundOp::Close => "close",
        }
    }
}
