//! # Chrome DevTools Protocol (CDP) 层
//!
//! 提供与 Chromium 浏览器的 WebSocket 通信能力，基于 Chrome DevTools Protocol 实现命令路由与事件分发。
//!
//! ## 主要功能
//! - **WebSocket 连接管理**: 单任务独占套接字，串行发送命令并按 id 关联响应
//! - **协议编解码**: 区分命令响应与事件通知，解析失败只丢弃单帧
//! - **事件订阅**: 按方法与会话过滤的事件流，支持 `"*"` 通配订阅
//! - **会话注册表**: 扁平模式（flatten）会话的挂载、查找与生命周期跟踪
//!
//! ## 模块结构
//! - `traits`: 连接抽象与事件流定义
//! - `types`: CDP 协议相关的数据类型
//! - `codec`: 线格式编解码
//! - `connection`: WebSocket 连接实现
//! - `registry`: 会话注册表
//! - `mock`: 用于测试的 Mock 实现
//!
//! ## 使用示例
//! ```rust,no_run
//! use oxdriver::cdp::{CdpConnection, CdpWebSocketConnection};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let connection =
//!     CdpWebSocketConnection::connect("ws://localhost:9222/devtools/browser/abc").await?;
//!
//! let version = connection
//!     .send_command(None, "Browser.getVersion", None)
//!     .await?;
//! println!("Browser: {}", version["product"]);
//! # Ok(())
//! # }
//! ```

pub mod traits;
pub mod types;
pub mod codec;
pub mod connection;
pub mod registry;
pub mod mock;


pub use traits::{CdpConnection, EventStream};
pub use types::{CdpEvent, CdpRequest, IncomingMessage};

// Re-export implementation structs
pub use connection::{CdpTimeoutConfig, CdpWebSocketConnection};
pub use registry::{Session, SessionRegistry};

// Re-export mock for development/testing
pub use mock::MockCdpConnection;
