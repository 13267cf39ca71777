//! # 浏览器驱动层
//!
//! 在 CDP 层之上提供面向调用者的自动化接口：连接浏览器、管理标签页、
//! 遍历框架（iframe）、查找并操作 DOM 元素。
//!
//! ## 主要功能
//! - **浏览器入口**: `ws://` 直连或 `http://` 经 `/json/version` 解析调试地址
//! - **标签页控制**: 导航与加载等待、就绪状态轮询、脚本执行、截图
//! - **框架树**: 按事件维护的 frame 层级，当前框架指针决定后续命令的作用域
//! - **元素句柄**: 轮询查找、点击与键盘输入、属性读写，框架导航后句柄自动失效
//! - **请求拦截**: Fetch 域暂停/放行/改写请求，代理认证自动应答
//!
//! ## 模块结构
//! - `browser`: 浏览器连接入口与标签页管理
//! - `tab`: 标签页控制器与事件泵
//! - `frame`: 框架树与框架切换
//! - `element`: 元素句柄与遍历
//! - `keys`: 键盘事件映射
//! - `intercept`: 请求拦截作用域
//!
//! ## 使用示例
//! ```rust,no_run
//! use oxdriver::driver::Browser;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let browser = Browser::connect("http://localhost:9222").await?;
//! let tab = browser.new_tab("about:blank").await?;
//!
//! tab.navigate("https://example.com").await?;
//! let heading = tab.find("h1").await?;
//! println!("Heading: {}", heading.text().await?);
//!
//! browser.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod browser;
pub mod tab;
pub mod frame;
pub mod element;
pub mod keys;
pub mod intercept;


pub use browser::Browser;
pub use element::Element;
pub use frame::{Frame, FrameTarget, FrameTree};
pub use intercept::{FetchInterception, InterceptedRequest, RequestStage};
pub use keys::SpecialKey;
pub use tab::{ReadyState, ScreenshotFormat, Tab, TabState};
