//! Telegram transport boundary for the stocktake bot.
//!
//! - **Updates** (`updates`) - Bot API update envelopes, classified once into
//!   the core's inbound events
//! - **Callbacks** (`callbacks`) - compact callback tokens for menu buttons
//! - **Keyboards** (`keyboards`) - `reply_markup` encoding
//! - **Events** (`events`) - dispatcher routing updates to handlers
//! - **Polling** (`polling`) - long-polling loop with reconnection
//! - **Gateway** (`gateway`) - loopback Messaging Gateway
//!
//! ```text
//! Bot API updates → PollingRunner → EventDispatcher → ConversationPort
//!                                                        ↓
//!                              MessagingGateway ← ConversationService
//! ```

pub mod callbacks;
pub mod events;
pub mod gateway;
pub mod keyboards;
pub mod polling;
pub mod updates;
