//! DIMSE消息处理
//!
//! C-FIND 服务类用户: 建立关联、发送查询命令与标识符、收集待定响应中的匹配结果。

use crate::association::PacsNode;
use crate::query::{FindRequest, HierarchicalFind};
use dicom::core::{dicom_value, DataElement, VR};
use dicom::dictionary_std::{tags, uids};
use dicom::encoding::{TransferSyntax, TransferSyntaxIndex};
use dicom::object::InMemDicomObject;
use dicom::transfer_syntax::entries::IMPLICIT_VR_LITTLE_ENDIAN;
use dicom::transfer_syntax::TransferSyntaxRegistry;
use dicom_ul::pdu::{PDataValue, PDataValueType};
use dicom_ul::{ClientAssociationOptions, Pdu};
use ingest_core::{ImportError, Result};
use std::sync::atomic::{AtomicU16, Ordering};
use tracing::{debug, info, warn};

/// Study Root Query/Retrieve Information Model - FIND
pub const STUDY_ROOT_FIND: &str = "1.2.840.10008.5.1.4.1.2.2.1";
/// 命令中不含数据集
const NO_DATA_SET: u16 = 0x0101;

/// DICOM命令字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandField {
    CFindRq,
    CFindRsp,
    CCancelRq,
    Unknown(u16),
}

impl CommandField {
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0020 => CommandField::CFindRq,
            0x8020 => CommandField::CFindRsp,
            0x0FFF => CommandField::CCancelRq,
            other => CommandField::Unknown(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            CommandField::CFindRq => 0x0020,
            CommandField::CFindRsp => 0x8020,
            CommandField::CCancelRq => 0x0FFF,
            CommandField::Unknown(code) => *code,
        }
    }
}

/// DIMSE状态码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimseStatus {
    Success,
    Pending,
    Cancel,
    Warning(u16),
    Failure(u16),
}

impl DimseStatus {
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0000 => DimseStatus::Success,
            0xFF00 | 0xFF01 => DimseStatus::Pending,
            0xFE00 => DimseStatus::Cancel,
            0x0001 | 0x0107 | 0x0116 | 0xB000..=0xBFFF => DimseStatus::Warning(code),
            other => DimseStatus::Failure(other),
        }
    }
}

/// 构造 C-FIND-RQ 命令
pub fn find_request_command(message_id: u16) -> InMemDicomObject {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            dicom_value!(Str, STUDY_ROOT_FIND),
        ),
        DataElement::new(
            tags::COMMAND_FIELD,
            VR::US,
            dicom_value!(U16, [CommandField::CFindRq.code()]),
        ),
        DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [message_id])),
        // 中等优先级
        DataElement::new(tags::PRIORITY, VR::US, dicom_value!(U16, [0x0000])),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [0x0001]),
        ),
    ])
}

/// 重组后的 C-FIND 响应
#[derive(Debug, Clone)]
pub struct FindResponse {
    pub status: DimseStatus,
    pub identifier: Option<InMemDicomObject>,
}

/// 将P-DATA片段重组为完整的响应消息
pub struct FindResponseAssembler<'a> {
    transfer_syntax: &'a TransferSyntax,
    command: Vec<u8>,
    data: Vec<u8>,
    pending: Option<DimseStatus>,
}

impl<'a> FindResponseAssembler<'a> {
    pub fn new(transfer_syntax: &'a TransferSyntax) -> Self {
        Self {
            transfer_syntax,
            command: Vec::new(),
            data: Vec::new(),
            pending: None,
        }
    }

    /// 推入一个片段，消息完整时返回响应
    pub fn push(&mut self, value: PDataValue) -> std::result::Result<Option<FindResponse>, String> {
        match value.value_type {
            PDataValueType::Command => {
                self.command.extend_from_slice(&value.data);
                if !value.is_last {
                    return Ok(None);
                }

                let command = InMemDicomObject::read_dataset_with_ts(
                    self.command.as_slice(),
                    &IMPLICIT_VR_LITTLE_ENDIAN.erased(),
                )
                .map_err(|e| format!("无法解析响应命令: {}", e))?;
                self.command.clear();

                let field = command
                    .element(tags::COMMAND_FIELD)
                    .ok()
                    .and_then(|element| element.to_int::<u16>().ok())
                    .map(CommandField::from_code);
                if field != Some(CommandField::CFindRsp) {
                    return Err(format!("意外的命令字段: {:?}", field));
                }

                let status = command
                    .element(tags::STATUS)
                    .ok()
                    .and_then(|element| element.to_int::<u16>().ok())
                    .map(DimseStatus::from_code)
                    .ok_or_else(|| "响应缺少状态字段".to_string())?;

                let data_set_type = command
                    .element(tags::COMMAND_DATA_SET_TYPE)
                    .ok()
                    .and_then(|element| element.to_int::<u16>().ok())
                    .unwrap_or(NO_DATA_SET);

                if data_set_type == NO_DATA_SET {
                    return Ok(Some(FindResponse {
                        status,
                        identifier: None,
                    }));
                }
                self.pending = Some(status);
                Ok(None)
            }
            PDataValueType::Data => {
                let Some(status) = self.pending else {
                    return Err("在响应命令之前收到数据片段".to_string());
                };
                self.data.extend_from_slice(&value.data);
                if !value.is_last {
                    return Ok(None);
                }

                let identifier =
                    InMemDicomObject::read_dataset_with_ts(self.data.as_slice(), self.transfer_syntax)
                        .map_err(|e| format!("无法解析响应标识符: {}", e))?;
                self.data.clear();
                self.pending = None;

                Ok(Some(FindResponse {
                    status,
                    identifier: Some(identifier),
                }))
            }
        }
    }
}

/// 基于 dicom-ul 的 C-FIND 客户端
pub struct DimseFindScu {
    node: PacsNode,
    message_id: AtomicU16,
}

impl DimseFindScu {
    pub fn new(node: PacsNode) -> Self {
        Self {
            node,
            message_id: AtomicU16::new(1),
        }
    }

    pub fn node(&self) -> &PacsNode {
        &self.node
    }

    fn next_message_id(&self) -> u16 {
        self.message_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl HierarchicalFind for DimseFindScu {
    fn endpoint(&self) -> String {
        self.node.endpoint()
    }

    fn find(&self, request: &FindRequest) -> Result<Vec<InMemDicomObject>> {
        let endpoint = self.endpoint();
        let transport = |message: String| ImportError::Transport {
            endpoint: endpoint.clone(),
            request_id: request.request_id.clone(),
            message,
        };
        let protocol = |message: String| ImportError::Protocol {
            endpoint: endpoint.clone(),
            request_id: request.request_id.clone(),
            message,
        };

        debug!("建立C-FIND关联: {}, 级别 {:?}", endpoint, request.level);
        let mut association = ClientAssociationOptions::new()
            .with_presentation_context(
                STUDY_ROOT_FIND,
                vec![uids::EXPLICIT_VR_LITTLE_ENDIAN, uids::IMPLICIT_VR_LITTLE_ENDIAN],
            )
            .calling_ae_title(self.node.calling_ae_title.as_str())
            .called_ae_title(self.node.called_ae_title.as_str())
            .max_pdu_length(self.node.max_pdu_length)
            .read_timeout(self.node.timeout())
            .write_timeout(self.node.timeout())
            .establish_with(&self.node.socket_address())
            .map_err(|e| transport(format!("关联建立失败: {}", e)))?;

        let (context_id, ts_uid) = association
            .presentation_contexts()
            .first()
            .map(|pc| (pc.id, pc.transfer_syntax.clone()))
            .ok_or_else(|| protocol("对端未接受查询表示上下文".to_string()))?;

        let ts = TransferSyntaxRegistry
            .get(ts_uid.trim_end_matches('\0'))
            .ok_or_else(|| protocol(format!("不支持的传输语法: {}", ts_uid)))?;

        let mut command_data = Vec::with_capacity(128);
        find_request_command(self.next_message_id())
            .write_dataset_with_ts(&mut command_data, &IMPLICIT_VR_LITTLE_ENDIAN.erased())
            .map_err(|e| protocol(format!("命令编码失败: {}", e)))?;

        let mut identifier_data = Vec::with_capacity(512);
        request
            .identifier
            .write_dataset_with_ts(&mut identifier_data, ts)
            .map_err(|e| protocol(format!("标识符编码失败: {}", e)))?;

        association
            .send(&Pdu::PData {
                data: vec![
                    PDataValue {
                        presentation_context_id: context_id,
                        value_type: PDataValueType::Command,
                        is_last: true,
                        data: command_data,
                    },
                    PDataValue {
                        presentation_context_id: context_id,
                        value_type: PDataValueType::Data,
                        is_last: true,
                        data: identifier_data,
                    },
                ],
            })
            .map_err(|e| transport(format!("发送查询失败: {}", e)))?;

        let mut assembler = FindResponseAssembler::new(ts);
        let mut matches = Vec::new();

        'receive: loop {
            let pdu = association
                .receive()
                .map_err(|e| transport(format!("接收响应失败: {}", e)))?;

            let values = match pdu {
                Pdu::PData { data } => data,
                Pdu::AbortRQ { .. } => return Err(protocol("对端中止了关联".to_string())),
                other => return Err(protocol(format!("意外的PDU: {:?}", other))),
            };

            for value in values {
                let Some(response) = assembler.push(value).map_err(&protocol)? else {
                    continue;
                };
                match response.status {
                    DimseStatus::Pending => {
                        if let Some(identifier) = response.identifier {
                            matches.push(identifier);
                        }
                    }
                    DimseStatus::Success => break 'receive,
                    DimseStatus::Warning(code) => {
                        warn!("C-FIND以警告状态结束: 0x{:04X}", code);
                        break 'receive;
                    }
                    DimseStatus::Cancel => {
                        warn!("C-FIND被取消，返回已收到的 {} 条结果", matches.len());
                        break 'receive;
                    }
                    DimseStatus::Failure(code) => {
                        return Err(protocol(format!("C-FIND失败，状态码 0x{:04X}", code)));
                    }
                }
            }
        }

        if let Err(e) = association.release() {
            warn!("释放关联失败: {}", e);
        }

        info!(
            "C-FIND完成: {}, 级别 {:?}, {} 条结果",
            endpoint,
            request.level,
            matches.len()
        );
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::PrimitiveValue;
    use dicom::transfer_syntax::entries::EXPLICIT_VR_LITTLE_ENDIAN;

    fn response_command(status: u16, with_data: bool) -> Vec<u8> {
        let command = InMemDicomObject::command_from_element_iter([
            DataElement::new(
                tags::COMMAND_FIELD,
                VR::US,
                dicom_value!(U16, [CommandField::CFindRsp.code()]),
            ),
            DataElement::new(tags::MESSAGE_ID_BEING_RESPONDED_TO, VR::US, dicom_value!(U16, [1])),
            DataElement::new(
                tags::COMMAND_DATA_SET_TYPE,
                VR::US,
                dicom_value!(U16, [if with_data { 0x0001 } else { NO_DATA_SET }]),
            ),
            DataElement::new(tags::STATUS, VR::US, dicom_value!(U16, [status])),
        ]);
        let mut bytes = Vec::new();
        command
            .write_dataset_with_ts(&mut bytes, &IMPLICIT_VR_LITTLE_ENDIAN.erased())
            .unwrap();
        bytes
    }

    fn fragment(value_type: PDataValueType, is_last: bool, data: Vec<u8>) -> PDataValue {
        PDataValue {
            presentation_context_id: 1,
            value_type,
            is_last,
            data,
        }
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(DimseStatus::from_code(0x0000), DimseStatus::Success);
        assert_eq!(DimseStatus::from_code(0xFF00), DimseStatus::Pending);
        assert_eq!(DimseStatus::from_code(0xFF01), DimseStatus::Pending);
        assert_eq!(DimseStatus::from_code(0xFE00), DimseStatus::Cancel);
        assert_eq!(DimseStatus::from_code(0xA700), DimseStatus::Failure(0xA700));
        assert_eq!(DimseStatus::from_code(0xC001), DimseStatus::Failure(0xC001));
    }

    #[test]
    fn test_find_request_command() {
        let command = find_request_command(7);
        let field = command.element(tags::COMMAND_FIELD).unwrap().to_int::<u16>().unwrap();
        assert_eq!(CommandField::from_code(field), CommandField::CFindRq);
        assert_eq!(
            command.element(tags::MESSAGE_ID).unwrap().to_int::<u16>().unwrap(),
            7
        );
        assert!(command.element(tags::COMMAND_GROUP_LENGTH).is_ok());
    }

    #[test]
    fn test_assembler_fragmented_pending_response() {
        let ts = EXPLICIT_VR_LITTLE_ENDIAN.erased();
        let identifier = InMemDicomObject::from_element_iter([DataElement::new(
            tags::STUDY_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from("1.2.3"),
        )]);
        let mut data = Vec::new();
        identifier.write_dataset_with_ts(&mut data, &ts).unwrap();

        let mut assembler = FindResponseAssembler::new(&ts);
        let command = response_command(0xFF00, true);
        let (head, tail) = command.split_at(10);
        assert!(assembler
            .push(fragment(PDataValueType::Command, false, head.to_vec()))
            .unwrap()
            .is_none());
        assert!(assembler
            .push(fragment(PDataValueType::Command, true, tail.to_vec()))
            .unwrap()
            .is_none());

        let (head, tail) = data.split_at(4);
        assert!(assembler
            .push(fragment(PDataValueType::Data, false, head.to_vec()))
            .unwrap()
            .is_none());
        let response = assembler
            .push(fragment(PDataValueType::Data, true, tail.to_vec()))
            .unwrap()
            .unwrap();
        assert_eq!(response.status, DimseStatus::Pending);
        let identifier = response.identifier.unwrap();
        assert_eq!(
            identifier.element(tags::STUDY_INSTANCE_UID).unwrap().to_str().unwrap().trim_end_matches('\0'),
            "1.2.3"
        );

        let response = assembler
            .push(fragment(PDataValueType::Command, true, response_command(0x0000, false)))
            .unwrap()
            .unwrap();
        assert_eq!(response.status, DimseStatus::Success);
        assert!(response.identifier.is_none());
    }

    #[test]
    fn test_assembler_rejects_data_before_command() {
        let ts = EXPLICIT_VR_LITTLE_ENDIAN.erased();
        let mut assembler = FindResponseAssembler::new(&ts);
        assert!(assembler
            .push(fragment(PDataValueType::Data, true, vec![0u8; 4]))
            .is_err());
    }

    #[test]
    fn test_connection_refused_is_transport_error() {
        let scu = DimseFindScu::new(PacsNode {
            host: "127.0.0.1".to_string(),
            port: 1,
            timeout_secs: 1,
            ..Default::default()
        });
        let request = FindRequest {
            request_id: "req-1".to_string(),
            level: crate::query::QueryLevel::Study,
            identifier: InMemDicomObject::new_empty(),
        };
        let err = scu.find(&request).unwrap_err();
        assert!(matches!(err, ImportError::Transport { .. }));
        assert!(err.is_retryable());
    }
}
