use std::{ops::Deref, time::Duration};

use reqwest::{Client, ClientBuilder};

use crate::StreamResult;

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(builder: ClientBuilder) -> StreamResult<Self> {
        let client = builder.build()?;
        Ok(Self { client })
    }

    /// Client whose requests give up after `timeout`. Without one a hung origin stalls the
    /// session forever.
    pub fn with_timeout(timeout: Option<Duration>) -> StreamResult<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Self::new(builder)
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Deref for HttpClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}
