use crate::prelude::*;

#[derive(Debug, Clone)]
pub struct Channels {
    pub to_jk_sniffer: broadcast::Sender<crate::jk::ChannelData>,
    pub to_xanbus_sniffer: broadcast::Sender<crate::xanbus::ChannelData>,
    pub to_poller: broadcast::Sender<crate::poller::ChannelData>,
    pub to_mqtt: broadcast::Sender<crate::mqtt::ChannelData>,
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}

impl Channels {
    pub fn new() -> Self {
        Self {
            to_jk_sniffer: Self::channel(),
            to_xanbus_sniffer: Self::channel(),
            to_poller: Self::channel(),
            to_mqtt: Self::channel(),
        }
    }

    fn channel<T: Clone>() -> broadcast::Sender<T> {
        broadcast::channel(2048).0
    }
}
