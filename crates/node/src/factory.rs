use std::{fmt::Debug, sync::Arc};

use devnode_config::SupervisorConfiguration;

use crate::{
    InstanceDefinition,
    instance::Instance,
    process::{ProcessAdapter, TokioProcessAdapter},
};

type Configure<P> = dyn Fn(P) -> Box<dyn InstanceDefinition> + Send + Sync;

/// Creates [`Instance`]s of one tool from its typed parameters.
///
/// The factory binds the supervisor configuration and the [`ProcessAdapter`] that its instances
/// spawn their processes with. Nothing is validated when an instance is created, invalid
/// parameters surface when the instance is started.
pub struct InstanceFactory<P> {
    configure: Arc<Configure<P>>,
    process_adapter: Arc<dyn ProcessAdapter>,
    configuration: SupervisorConfiguration,
}

/// Defines a new kind of instance from a function turning tool parameters into a definition.
pub fn define_instance<P, D>(
    configure: impl Fn(P) -> D + Send + Sync + 'static,
) -> InstanceFactory<P>
where
    D: InstanceDefinition,
{
    InstanceFactory {
        configure: Arc::new(move |parameters| -> Box<dyn InstanceDefinition> {
            Box::new(configure(parameters))
        }),
        process_adapter: Arc::new(TokioProcessAdapter),
        configuration: SupervisorConfiguration::default(),
    }
}

impl<P> InstanceFactory<P> {
    pub fn with_configuration(mut self, configuration: impl AsRef<SupervisorConfiguration>) -> Self {
        self.configuration = configuration.as_ref().clone();
        self
    }

    pub fn with_process_adapter(mut self, process_adapter: impl ProcessAdapter + 'static) -> Self {
        self.process_adapter = Arc::new(process_adapter);
        self
    }

    pub fn configuration(&self) -> &SupervisorConfiguration {
        &self.configuration
    }

    pub fn create(&self, parameters: P) -> Instance {
        Instance::from_boxed_definition(
            (self.configure)(parameters),
            self.process_adapter.clone(),
            &self.configuration,
        )
    }
}

impl<P> Clone for InstanceFactory<P> {
    fn clone(&self) -> Self {
        Self {
            configure: self.configure.clone(),
            process_adapter: self.process_adapter.clone(),
            configuration: self.configuration.clone(),
        }
    }
}

impl<P> Debug for InstanceFactory<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceFactory")
            .field("configuration", &self.configuration)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        instance::{InstanceStatus, StartOptions},
        testing::{ScriptedAdapter, TestNode},
    };

    use super::*;

    #[tokio::test]
    async fn created_instances_share_nothing_but_the_definition() {
        // Arrange
        let adapter = ScriptedAdapter::with_stdout(["Listening on 127.0.0.1:8545"]);
        let factory = define_instance(TestNode::new).with_process_adapter(adapter.clone());
        let first = factory.create(8545);
        let second = factory.create(8546);

        // Act
        first
            .start(StartOptions::default())
            .await
            .expect("Failed to start the instance");

        // Assert
        assert_eq!(first.status(), InstanceStatus::Started);
        assert_eq!(second.status(), InstanceStatus::Idle);
        assert_eq!(first.port(), 8545);
        assert_eq!(second.port(), 8546);
        assert!(second.messages().is_empty());
        assert_eq!(adapter.spawned(), 1);
    }

    #[tokio::test]
    async fn bound_configuration_reaches_the_instances() {
        // Arrange
        let adapter = ScriptedAdapter::with_stdout(["a", "b", "Listening on 127.0.0.1:8545"]);
        let configuration = SupervisorConfiguration {
            message_capacity: 1,
            ..Default::default()
        };
        let factory = define_instance(TestNode::new)
            .with_configuration(&configuration)
            .with_process_adapter(adapter);

        // Act
        let instance = factory.clone().create(8545);
        instance
            .start(StartOptions::default())
            .await
            .expect("Failed to start the instance");

        // Assert
        assert_eq!(factory.configuration(), &configuration);
        assert_eq!(instance.messages(), ["Listening on 127.0.0.1:8545"]);
    }

    #[test]
    fn creating_an_instance_never_validates() {
        // Arrange
        let factory = define_instance(TestNode::new);

        // Act
        let instance = factory.create(0);

        // Assert
        assert_eq!(instance.status(), InstanceStatus::Idle);
        assert_eq!(instance.name(), "testnode");
        assert_eq!(instance.host(), "127.0.0.1");
    }
}
