mod settings;

pub use settings::{
    DashboardConfig, FeedSettings, LogConfig, LogFormat, RedisConfig, ServerConfig, Settings,
};
