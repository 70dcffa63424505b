use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::collector::Collector;
use crate::error::{CollectError, FlattenError};
use crate::model::{
    Direction, Endpoint, Instance, LoadBalancer, RawRule, RejectedRule, Resource, ResourceKind,
    SecurityGroup, TargetSpec,
};

const GROUP_NOT_FOUND: &str = "InvalidGroup.NotFound";

/// Collector backed by the `aws` command line tool.
#[derive(Debug, Clone)]
pub struct AwsCli {
    program: String,
    profile: Option<String>,
    call_timeout: Duration,
}

impl AwsCli {
    pub fn new(profile: Option<String>, call_timeout: Duration) -> Self {
        Self {
            program: "aws".to_string(),
            profile,
            call_timeout,
        }
    }

    /// Use another executable in place of `aws`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    async fn call(&self, region: Option<&str>, args: &[&str]) -> Result<Value, CollectError> {
        let operation = args.join(" ");

        let mut cmd = Command::new(&self.program);
        cmd.args(args).args(["--output", "json"]);
        if let Some(region) = region {
            cmd.args(["--region", region]);
        }
        if let Some(profile) = &self.profile {
            cmd.args(["--profile", profile.as_str()]);
        }
        // The child must not outlive a timed-out call.
        cmd.kill_on_drop(true);

        log::debug!("aws {} (region: {})", operation, region.unwrap_or("default"));

        let output = timeout(self.call_timeout, cmd.output())
            .await
            .map_err(|_| CollectError::Timeout {
                operation: operation.clone(),
                after: self.call_timeout,
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CollectError::Provider {
                operation,
                message: stderr.trim().to_string(),
            });
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

#[async_trait]
impl Collector for AwsCli {
    async fn list_regions(&self) -> Result<Vec<String>, CollectError> {
        let json = self.call(None, &["ec2", "describe-regions"]).await?;
        Ok(parse_regions(&json)?)
    }

    async fn list_resources(
        &self,
        region: &str,
        kind: ResourceKind,
    ) -> Result<Vec<Resource>, CollectError> {
        let resources = match kind {
            ResourceKind::Instance => {
                let json = self.call(Some(region), &["ec2", "describe-instances"]).await?;
                parse_instances(&json)?
            }
            ResourceKind::LoadBalancer => {
                let json = self
                    .call(Some(region), &["elbv2", "describe-load-balancers"])
                    .await?;
                parse_load_balancers(&json)?
            }
            ResourceKind::Endpoint => {
                let json = self
                    .call(Some(region), &["ec2", "describe-vpc-endpoints"])
                    .await?;
                parse_endpoints(&json)?
            }
        };
        Ok(resources)
    }

    async fn security_group(
        &self,
        region: &str,
        group_id: &str,
    ) -> Result<Option<SecurityGroup>, CollectError> {
        let result = self
            .call(
                Some(region),
                &["ec2", "describe-security-groups", "--group-ids", group_id],
            )
            .await;

        let json = match result {
            Ok(json) => json,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(e),
        };

        let Some(group) = json["SecurityGroups"].as_array().and_then(|sgs| sgs.first()) else {
            return Ok(None);
        };
        Ok(Some(parse_security_group(group)?))
    }
}

fn is_not_found(err: &CollectError) -> bool {
    matches!(err, CollectError::Provider { message, .. } if message.contains(GROUP_NOT_FOUND))
}

fn required_str(value: &Value, field: &'static str) -> Result<String, FlattenError> {
    match &value[field] {
        Value::String(s) => Ok(s.clone()),
        Value::Null => Err(FlattenError::missing(field)),
        other => Err(FlattenError::invalid(field, format!("is not a string: {}", other))),
    }
}

fn optional_i64(value: &Value, field: &'static str) -> Result<Option<i64>, FlattenError> {
    match &value[field] {
        Value::Null => Ok(None),
        v => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| FlattenError::invalid(field, format!("is not an integer: {}", v))),
    }
}

/// Elements of an optional array field; absent means empty.
fn items<'a>(value: &'a Value, field: &'static str) -> Result<&'a [Value], FlattenError> {
    match &value[field] {
        Value::Null => Ok(&[][..]),
        Value::Array(items) => Ok(items.as_slice()),
        other => Err(FlattenError::invalid(field, format!("is not a list: {}", other))),
    }
}

pub fn parse_regions(json: &Value) -> Result<Vec<String>, FlattenError> {
    items(json, "Regions")?
        .iter()
        .map(|r| required_str(r, "RegionName"))
        .collect()
}

pub fn parse_instances(json: &Value) -> Result<Vec<Resource>, FlattenError> {
    let mut instances = vec![];
    for reservation in items(json, "Reservations")? {
        for inst in items(reservation, "Instances")? {
            let name_tag = items(inst, "Tags")?
                .iter()
                .find(|tag| tag["Key"].as_str() == Some("Name"))
                .and_then(|tag| tag["Value"].as_str())
                .map(str::to_string);

            let security_group_ids = items(inst, "SecurityGroups")?
                .iter()
                .map(|sg| required_str(sg, "GroupId"))
                .collect::<Result<_, _>>()?;

            instances.push(Resource::Instance(Instance {
                id: required_str(inst, "InstanceId")?,
                name_tag,
                security_group_ids,
            }));
        }
    }
    Ok(instances)
}

pub fn parse_load_balancers(json: &Value) -> Result<Vec<Resource>, FlattenError> {
    items(json, "LoadBalancers")?
        .iter()
        .map(|lb| {
            // Network load balancers may have no security groups at all.
            let security_group_ids = items(lb, "SecurityGroups")?
                .iter()
                .map(|sg| {
                    sg.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| FlattenError::invalid("SecurityGroups", "holds a non-string id"))
                })
                .collect::<Result<_, _>>()?;

            Ok(Resource::LoadBalancer(LoadBalancer {
                arn: required_str(lb, "LoadBalancerArn")?,
                name: required_str(lb, "LoadBalancerName")?,
                security_group_ids,
            }))
        })
        .collect()
}

pub fn parse_endpoints(json: &Value) -> Result<Vec<Resource>, FlattenError> {
    items(json, "VpcEndpoints")?
        .iter()
        .map(|ep| {
            let security_group_ids = items(ep, "Groups")?
                .iter()
                .map(|g| required_str(g, "GroupId"))
                .collect::<Result<_, _>>()?;

            Ok(Resource::Endpoint(Endpoint {
                id: required_str(ep, "VpcEndpointId")?,
                security_group_ids,
            }))
        })
        .collect()
}

/// Parses one `SecurityGroups[]` entry. Unreadable rules are kept aside
/// in `rejected` so the rest of the group still reports.
pub fn parse_security_group(group: &Value) -> Result<SecurityGroup, FlattenError> {
    let mut sg = SecurityGroup {
        id: required_str(group, "GroupId")?,
        name: required_str(group, "GroupName")?,
        ..Default::default()
    };

    for (direction, field) in [
        (Direction::Inbound, "IpPermissions"),
        (Direction::Outbound, "IpPermissionsEgress"),
    ] {
        for rule in items(group, field)? {
            match parse_rule(rule) {
                Ok(rule) => match direction {
                    Direction::Inbound => sg.inbound.push(rule),
                    Direction::Outbound => sg.outbound.push(rule),
                },
                Err(error) => sg.rejected.push(RejectedRule { direction, error }),
            }
        }
    }

    Ok(sg)
}

pub fn parse_rule(rule: &Value) -> Result<RawRule, FlattenError> {
    let protocol = match &rule["IpProtocol"] {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => {
            return Err(FlattenError::invalid(
                "IpProtocol",
                format!("is not a string: {}", other),
            ))
        }
    };

    let mut targets = vec![];
    for range in items(rule, "IpRanges")? {
        targets.push(TargetSpec::Cidr4(required_str(range, "CidrIp")?));
    }
    for range in items(rule, "Ipv6Ranges")? {
        targets.push(TargetSpec::Cidr6(required_str(range, "CidrIpv6")?));
    }
    for pair in items(rule, "UserIdGroupPairs")? {
        // Default-VPC style pairs may only carry the group name.
        let group = required_str(pair, "GroupId").or_else(|_| required_str(pair, "GroupName"))?;
        targets.push(TargetSpec::PeerGroup(group));
    }
    for list in items(rule, "PrefixListIds")? {
        targets.push(TargetSpec::PrefixList(required_str(list, "PrefixListId")?));
    }

    Ok(RawRule {
        protocol,
        from_port: optional_i64(rule, "FromPort")?,
        to_port: optional_i64(rule, "ToPort")?,
        targets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Attached;
    use serde_json::json;

    #[test]
    fn regions_from_describe_regions() {
        let json = json!({
            "Regions": [
                {"Endpoint": "ec2.eu-west-1.amazonaws.com", "RegionName": "eu-west-1", "OptInStatus": "opt-in-not-required"},
                {"Endpoint": "ec2.us-east-1.amazonaws.com", "RegionName": "us-east-1", "OptInStatus": "opt-in-not-required"}
            ]
        });
        assert_eq!(parse_regions(&json).unwrap(), ["eu-west-1", "us-east-1"]);
    }

    #[test]
    fn instances_across_reservations() {
        let json = json!({
            "Reservations": [
                {"Instances": [{
                    "InstanceId": "i-0aaa",
                    "Tags": [{"Key": "env", "Value": "prod"}, {"Key": "Name", "Value": "bastion"}],
                    "SecurityGroups": [{"GroupName": "ssh", "GroupId": "sg-1"}, {"GroupName": "base", "GroupId": "sg-2"}]
                }]},
                {"Instances": [{
                    "InstanceId": "i-0bbb",
                    "SecurityGroups": []
                }]}
            ]
        });
        let instances = parse_instances(&json).unwrap();

        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].id(), "i-0aaa");
        assert_eq!(instances[0].name(), "bastion");
        assert_eq!(instances[0].security_group_ids(), ["sg-1", "sg-2"]);
        assert_eq!(instances[1].name(), "None");
        assert!(instances[1].security_group_ids().is_empty());
    }

    #[test]
    fn empty_region_lists_nothing() {
        assert!(parse_instances(&json!({"Reservations": []})).unwrap().is_empty());
        assert!(parse_load_balancers(&json!({"LoadBalancers": []})).unwrap().is_empty());
        assert!(parse_endpoints(&json!({})).unwrap().is_empty());
    }

    #[test]
    fn load_balancers_with_and_without_groups() {
        let json = json!({
            "LoadBalancers": [
                {
                    "LoadBalancerArn": "arn:aws:elasticloadbalancing:us-east-1:111122223333:loadbalancer/app/web/50dc6c495c0c9188",
                    "LoadBalancerName": "web",
                    "Type": "application",
                    "SecurityGroups": ["sg-web"]
                },
                {
                    "LoadBalancerArn": "arn:aws:elasticloadbalancing:us-east-1:111122223333:loadbalancer/net/nlb/1",
                    "LoadBalancerName": "nlb",
                    "Type": "network"
                }
            ]
        });
        let lbs = parse_load_balancers(&json).unwrap();

        assert_eq!(lbs[0].kind(), ResourceKind::LoadBalancer);
        assert_eq!(lbs[0].name(), "web");
        assert_eq!(lbs[0].security_group_ids(), ["sg-web"]);
        assert!(lbs[1].security_group_ids().is_empty());
    }

    #[test]
    fn endpoints_use_their_id_as_name() {
        let json = json!({
            "VpcEndpoints": [{
                "VpcEndpointId": "vpce-0123",
                "VpcEndpointType": "Interface",
                "Groups": [{"GroupId": "sg-ep", "GroupName": "endpoint-sg"}]
            }]
        });
        let eps = parse_endpoints(&json).unwrap();

        assert_eq!(eps[0].id(), "vpce-0123");
        assert_eq!(eps[0].name(), "vpce-0123");
        assert_eq!(eps[0].security_group_ids(), ["sg-ep"]);
    }

    #[test]
    fn instance_without_id_is_malformed() {
        let json = json!({"Reservations": [{"Instances": [{"SecurityGroups": []}]}]});
        assert_eq!(
            parse_instances(&json).unwrap_err(),
            FlattenError::missing("InstanceId")
        );
    }

    #[test]
    fn rule_collects_all_target_kinds() {
        let rule = json!({
            "IpProtocol": "tcp",
            "FromPort": 443,
            "ToPort": 443,
            "IpRanges": [{"CidrIp": "10.0.0.0/16", "Description": "vpc"}],
            "Ipv6Ranges": [{"CidrIpv6": "2001:db8::/32"}],
            "UserIdGroupPairs": [{"GroupId": "sg-peer", "UserId": "111122223333"}],
            "PrefixListIds": [{"PrefixListId": "pl-63a5400a"}]
        });
        let raw = parse_rule(&rule).unwrap();

        assert_eq!(raw.protocol.as_deref(), Some("tcp"));
        assert_eq!(raw.from_port, Some(443));
        assert_eq!(raw.to_port, Some(443));
        assert_eq!(
            raw.targets,
            vec![
                TargetSpec::Cidr4("10.0.0.0/16".into()),
                TargetSpec::Cidr6("2001:db8::/32".into()),
                TargetSpec::PeerGroup("sg-peer".into()),
                TargetSpec::PrefixList("pl-63a5400a".into()),
            ]
        );
    }

    #[test]
    fn all_traffic_rule_has_no_ports() {
        let rule = json!({"IpProtocol": "-1", "IpRanges": [{"CidrIp": "0.0.0.0/0"}]});
        let raw = parse_rule(&rule).unwrap();
        assert_eq!(raw.from_port, None);
        assert_eq!(raw.to_port, None);
    }

    #[test]
    fn peer_group_falls_back_to_name() {
        let rule = json!({"IpProtocol": "tcp", "UserIdGroupPairs": [{"GroupName": "default"}]});
        let raw = parse_rule(&rule).unwrap();
        assert_eq!(raw.targets, vec![TargetSpec::PeerGroup("default".into())]);
    }

    #[test]
    fn string_port_is_malformed() {
        let rule = json!({"IpProtocol": "tcp", "FromPort": "22", "ToPort": 22});
        let err = parse_rule(&rule).unwrap_err();
        assert!(matches!(err, FlattenError::DataShape { field: "FromPort", .. }));
    }

    #[test]
    fn bad_rule_is_set_aside_not_fatal() {
        let group = json!({
            "GroupId": "sg-1",
            "GroupName": "web",
            "IpPermissions": [
                {"IpProtocol": "tcp", "FromPort": 80, "ToPort": 80, "IpRanges": [{"CidrIp": "0.0.0.0/0"}]},
                {"IpProtocol": "tcp", "FromPort": 22, "ToPort": 22, "IpRanges": [{"Description": "no cidr"}]}
            ],
            "IpPermissionsEgress": [
                {"IpProtocol": "-1", "IpRanges": [{"CidrIp": "0.0.0.0/0"}]}
            ]
        });
        let sg = parse_security_group(&group).unwrap();

        assert_eq!(sg.id, "sg-1");
        assert_eq!(sg.name, "web");
        assert_eq!(sg.inbound.len(), 1);
        assert_eq!(sg.outbound.len(), 1);
        assert_eq!(sg.rejected.len(), 1);
        assert_eq!(sg.rejected[0].direction, Direction::Inbound);
        assert_eq!(sg.rejected[0].error, FlattenError::missing("CidrIp"));
    }

    #[test]
    fn not_found_is_recognised_from_stderr() {
        let err = CollectError::Provider {
            operation: "ec2 describe-security-groups --group-ids sg-gone".into(),
            message: "An error occurred (InvalidGroup.NotFound) when calling the DescribeSecurityGroups operation: The security group 'sg-gone' does not exist".into(),
        };
        assert!(is_not_found(&err));

        let other = CollectError::Provider {
            operation: "ec2 describe-security-groups".into(),
            message: "An error occurred (UnauthorizedOperation)".into(),
        };
        assert!(!is_not_found(&other));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let cli = AwsCli::new(None, Duration::from_secs(5))
            .with_program("sg-report-test-no-such-binary");
        let err = cli.list_regions().await.unwrap_err();
        assert!(matches!(err, CollectError::Spawn(_)));
    }

    /// Writes an executable shell script standing in for the `aws` binary.
    #[cfg(unix)]
    fn fake_aws(dir: &tempfile::TempDir, body: &str) -> AwsCli {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("aws");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        AwsCli::new(None, Duration::from_secs(1)).with_program(path.to_string_lossy())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_call_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let cli = fake_aws(&dir, "sleep 5");

        let started = std::time::Instant::now();
        let err = cli.list_regions().await.unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(4));
        match err {
            CollectError::Timeout { operation, after } => {
                assert_eq!(operation, "ec2 describe-regions");
                assert_eq!(after, Duration::from_secs(1));
            }
            other => panic!("expected a timeout, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn deleted_group_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let cli = fake_aws(
            &dir,
            "echo \"An error occurred (InvalidGroup.NotFound) when calling the DescribeSecurityGroups operation: The security group 'sg-gone' does not exist\" >&2\nexit 254",
        );

        let group = cli.security_group("eu-west-1", "sg-gone").await.unwrap();
        assert_eq!(group, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn empty_group_list_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let cli = fake_aws(&dir, r#"echo '{"SecurityGroups": []}'"#);

        let group = cli.security_group("eu-west-1", "sg-1").await.unwrap();
        assert_eq!(group, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn other_failures_are_provider_errors() {
        let dir = tempfile::tempdir().unwrap();
        let cli = fake_aws(
            &dir,
            "echo 'An error occurred (UnauthorizedOperation) when calling the DescribeSecurityGroups operation' >&2\nexit 254",
        );

        let err = cli.security_group("eu-west-1", "sg-1").await.unwrap_err();
        match err {
            CollectError::Provider { operation, message } => {
                assert_eq!(operation, "ec2 describe-security-groups --group-ids sg-1");
                assert!(message.contains("UnauthorizedOperation"), "{}", message);
            }
            other => panic!("expected a provider error, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn group_is_read_from_cli_output() {
        let dir = tempfile::tempdir().unwrap();
        let cli = fake_aws(
            &dir,
            r#"echo '{"SecurityGroups": [{"GroupId": "sg-1", "GroupName": "web", "IpPermissions": [{"IpProtocol": "tcp", "FromPort": 443, "ToPort": 443, "IpRanges": [{"CidrIp": "0.0.0.0/0"}]}], "IpPermissionsEgress": []}]}'"#,
        );

        let group = cli.security_group("eu-west-1", "sg-1").await.unwrap().unwrap();
        assert_eq!(group.name, "web");
        assert_eq!(group.inbound.len(), 1);
        assert!(group.outbound.is_empty());
    }
}
