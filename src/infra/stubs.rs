use crate::{
    domain::audience::CustomerProfile,
    usecases::contracts::{
        CustomerDirectory, DirectorySourceError, OutboundRequest, OutboundTransport,
        TransportError,
    },
};

#[cfg(test)]
use crate::infra::{config::AppConfig, contracts::ConfigAdapter, error::AppError};

#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct StubConfigAdapter;

#[cfg(test)]
impl ConfigAdapter for StubConfigAdapter {
    fn load(&self) -> Result<AppConfig, AppError> {
        Ok(AppConfig::default())
    }
}

/// Transport that accepts every message without leaving the process.
#[derive(Debug, Clone, Default)]
pub struct LoopbackTransport;

impl OutboundTransport for LoopbackTransport {
    fn send(&self, request: &OutboundRequest<'_>) -> Result<(), TransportError> {
        tracing::debug!(
            conversation_id = %request.conversation_id,
            customer_id = %request.customer,
            content = %request.content.display_content(),
            "loopback transport accepted message"
        );
        Ok(())
    }
}

/// Fixed customer list, used when no directory file is configured.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCustomerDirectory {
    customers: Vec<CustomerProfile>,
}

impl InMemoryCustomerDirectory {
    pub fn new(customers: Vec<CustomerProfile>) -> Self {
        Self { customers }
    }
}

impl CustomerDirectory for InMemoryCustomerDirectory {
    fn customers(&self) -> Result<Vec<CustomerProfile>, DirectorySourceError> {
        Ok(self.customers.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ids::{ConversationId, CustomerId},
        message::MessageContent,
    };

    #[test]
    fn stub_config_returns_defaults() {
        let adapter = StubConfigAdapter;
        let config = adapter.load().expect("stub config must load");

        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn loopback_accepts_every_message() {
        let customer = CustomerId::new("c1");
        let content = MessageContent::text("hello");

        let result = LoopbackTransport.send(&OutboundRequest {
            conversation_id: ConversationId(1),
            customer: &customer,
            content: &content,
        });

        assert_eq!(result, Ok(()));
    }

    #[test]
    fn empty_directory_has_no_customers() {
        assert_eq!(InMemoryCustomerDirectory::default().customers(), Ok(Vec::new()));
    }
}
