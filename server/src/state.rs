use std::sync::Arc;

use crate::account::Confirmations;
use crate::config::Config;
use crate::database::{init_redis, RedisStore};
use crate::mailer::HttpMailer;
use crate::token::TokenCodec;

pub struct State {
    pub config: Config,
    pub confirmations: Confirmations,
}

impl State {
    pub async fn new() -> Arc<Self> {
        let config = Config::load();

        let redis_connection = init_redis(&config.redis_url).await;
        let store = Arc::new(RedisStore::new(redis_connection));
        let mailer = Arc::new(HttpMailer::new(
            &config.mail_api_url,
            &config.mail_api_key,
            &config.mail_sender,
        ));
        let codec = TokenCodec::new(config.confirm_secret.as_bytes().to_vec());

        let confirmations = Confirmations::new(store, mailer, codec, &config.public_url);

        Arc::new(Self {
            config,
            confirmations,
        })
    }
}
