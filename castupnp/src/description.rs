//! Parsing du `description.xml` d'un device UPnP.

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::debug;

/// Service déclaré dans la description
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceDescription {
    pub service_type: String,
    /// controlURL tel que déclaré (éventuellement relatif)
    pub control_url: String,
    /// eventSubURL tel que déclaré, absent pour certains firmwares
    pub event_sub_url: Option<String>,
}

/// Description d'un device (root device et devices embarqués aplatis)
#[derive(Debug, Clone, Default)]
pub struct DeviceDescription {
    pub udn: Option<String>,
    pub device_type: Option<String>,
    pub friendly_name: Option<String>,
    pub manufacturer: Option<String>,
    pub model_name: Option<String>,
    pub url_base: Option<String>,
    pub services: Vec<ServiceDescription>,
}

#[derive(Debug, thiserror::Error)]
pub enum DescriptionError {
    #[error("XML error in device description: {0}")]
    Xml(String),

    #[error("Device description has no <device> element")]
    MissingDevice,
}

impl DeviceDescription {
    /// Premier service dont le type contient `fragment` (insensible à la casse),
    /// ex: `"service:AVTransport:"`.
    pub fn find_service(&self, fragment: &str) -> Option<&ServiceDescription> {
        let fragment = fragment.to_ascii_lowercase();
        self.services
            .iter()
            .find(|s| s.service_type.to_ascii_lowercase().contains(&fragment))
    }

    pub fn is_media_renderer(&self) -> bool {
        self.device_type
            .as_deref()
            .map(|t| t.to_ascii_lowercase().contains(":device:mediarenderer:"))
            .unwrap_or(false)
            || self.find_service("service:AVTransport:").is_some()
    }
}

#[derive(Default)]
struct ServiceBuilder {
    service_type: Option<String>,
    control_url: Option<String>,
    event_sub_url: Option<String>,
}

/// Parse un document de description.
///
/// Les champs d'identité (UDN, friendlyName...) viennent du root device ;
/// les services de tous les devices imbriqués sont collectés.
pub fn parse_device_description(xml: &str) -> Result<DeviceDescription, DescriptionError> {
    let mut reader = Reader::from_str(xml);

    let mut parsed = DeviceDescription::default();
    let mut device_depth = 0usize;
    let mut seen_device = false;
    let mut current_service: Option<ServiceBuilder> = None;
    let mut current_tag: Option<String> = None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                match name.as_str() {
                    "device" => {
                        device_depth += 1;
                        seen_device = true;
                    }
                    "service" if device_depth > 0 => {
                        current_service = Some(ServiceBuilder::default());
                    }
                    _ => {}
                }
                current_tag = Some(name);
                text.clear();
            }
            Ok(Event::Text(e)) => {
                let chunk = e
                    .decode()
                    .map_err(|err| DescriptionError::Xml(err.to_string()))?;
                text.push_str(&chunk);
            }
            Ok(Event::GeneralRef(e)) => match e.resolve_char_ref() {
                Ok(Some(ch)) => text.push(ch),
                _ => {
                    let entity = String::from_utf8_lossy(&e).to_string();
                    text.push_str(resolve_entity(&entity));
                }
            },
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                let value = text.trim().to_string();
                text.clear();

                match name.as_str() {
                    "device" => device_depth = device_depth.saturating_sub(1),
                    "service" => {
                        if let Some(builder) = current_service.take() {
                            if let (Some(service_type), Some(control_url)) =
                                (builder.service_type, builder.control_url)
                            {
                                parsed.services.push(ServiceDescription {
                                    service_type,
                                    control_url,
                                    event_sub_url: builder.event_sub_url,
                                });
                            }
                        }
                    }
                    "URLBase" if device_depth == 0 && !value.is_empty() => {
                        parsed.url_base = Some(value);
                    }
                    _ if current_tag.as_deref() == Some(name.as_str()) && !value.is_empty() => {
                        if let Some(service) = current_service.as_mut() {
                            match name.as_str() {
                                "serviceType" => service.service_type = Some(value),
                                "controlURL" => service.control_url = Some(value),
                                "eventSubURL" => service.event_sub_url = Some(value),
                                _ => {}
                            }
                        } else if device_depth == 1 {
                            match name.as_str() {
                                "UDN" => parsed.udn = Some(value),
                                "deviceType" => parsed.device_type = Some(value),
                                "friendlyName" => parsed.friendly_name = Some(value),
                                "manufacturer" => parsed.manufacturer = Some(value),
                                "modelName" => parsed.model_name = Some(value),
                                _ => {}
                            }
                        }
                    }
                    _ => {}
                }
                current_tag = None;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(DescriptionError::Xml(err.to_string())),
        }
    }

    if !seen_device {
        return Err(DescriptionError::MissingDevice);
    }

    debug!(
        udn = parsed.udn.as_deref().unwrap_or("?"),
        services = parsed.services.len(),
        "Parsed device description"
    );
    Ok(parsed)
}

fn resolve_entity(entity: &str) -> &'static str {
    match entity {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMSUNG_DMR: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0" xmlns:dlna="urn:schemas-dlna-org:device-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
    <friendlyName>[TV] Living Room &amp; Co</friendlyName>
    <manufacturer>Samsung Electronics</manufacturer>
    <modelName>UE55</modelName>
    <UDN>uuid:dev-42</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:RenderingControl:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:RenderingControl</serviceId>
        <controlURL>/upnp/control/RenderingControl1</controlURL>
        <eventSubURL>/upnp/event/RenderingControl1</eventSubURL>
      </service>
      <service>
        <serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:AVTransport</serviceId>
        <controlURL>/upnp/control/AVTransport1</controlURL>
        <eventSubURL>/upnp/event/AVTransport1</eventSubURL>
      </service>
      <service>
        <serviceType>urn:schemas-upnp-org:service:ConnectionManager:1</serviceType>
        <controlURL>/upnp/control/ConnectionManager1</controlURL>
      </service>
    </serviceList>
  </device>
</root>"#;

    #[test]
    fn test_parse_media_renderer() {
        let desc = parse_device_description(SAMSUNG_DMR).unwrap();
        assert_eq!(desc.udn.as_deref(), Some("uuid:dev-42"));
        assert_eq!(desc.friendly_name.as_deref(), Some("[TV] Living Room & Co"));
        assert_eq!(desc.services.len(), 3);
        assert!(desc.is_media_renderer());

        let avt = desc.find_service("service:avtransport:").unwrap();
        assert_eq!(avt.control_url, "/upnp/control/AVTransport1");
        assert_eq!(avt.event_sub_url.as_deref(), Some("/upnp/event/AVTransport1"));

        let cm = desc.find_service("service:ConnectionManager:").unwrap();
        assert_eq!(cm.event_sub_url, None);
    }

    #[test]
    fn test_embedded_device_keeps_root_identity() {
        let xml = r#"<root><URLBase>http://10.0.0.9:8000/</URLBase><device>
  <deviceType>urn:schemas-upnp-org:device:MediaServer:1</deviceType>
  <friendlyName>Root</friendlyName>
  <UDN>uuid:root</UDN>
  <deviceList><device>
    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
    <friendlyName>Child</friendlyName>
    <UDN>uuid:child</UDN>
    <serviceList><service>
      <serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType>
      <controlURL>avt/ctl</controlURL>
    </service></serviceList>
  </device></deviceList>
</device></root>"#;
        let desc = parse_device_description(xml).unwrap();
        assert_eq!(desc.friendly_name.as_deref(), Some("Root"));
        assert_eq!(desc.udn.as_deref(), Some("uuid:root"));
        assert_eq!(desc.url_base.as_deref(), Some("http://10.0.0.9:8000/"));
        assert!(desc.is_media_renderer());
    }

    #[test]
    fn test_not_a_device_description() {
        assert!(matches!(
            parse_device_description("<html><body>nope</body></html>"),
            Err(DescriptionError::MissingDevice)
        ));
        assert!(parse_device_description("<root><device></root>").is_err());
    }
}
