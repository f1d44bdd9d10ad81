//! Virtual handset
//!
//! [`VirtualPhone`] implements [`SerialChannel`] entirely in memory. It
//! answers the AT commands the session uses (object store and upload
//! handshake, identity, alarms, SMS, PIN, calls, power off) and records every
//! channel event so tests can assert on what went over the wire.
//!
//! Clones share one handset: a test keeps a clone for scripting and
//! inspection while the session owns another.

use crate::core::at::{latin1_to_string, string_to_latin1};
use crate::core::phone::PhoneAlarm;
use crate::core::transport::{PortConfig, SerialChannel, TransportError};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

const CTRL_Z: u8 = 0x1A;
const ESC: u8 = 0x1B;
const ALARM_SLOTS: std::ops::RangeInclusive<u32> = 1..=5;

/// One recorded channel event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    /// Bytes of one `write` call
    Write(Vec<u8>),
    Close,
}

/// Object held in the virtual store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredElement {
    pub id: String,
    pub category: String,
    pub element_type: String,
    pub name: String,
    pub data: Vec<u8>,
    pub hidden: bool,
}

/// SMS held in the virtual store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: u32,
    pub status: String,
    pub number: String,
    pub datetime: String,
    pub body: String,
}

/// Canned reply for commands starting with `prefix`
#[derive(Debug, Clone)]
struct ResponseRule {
    prefix: String,
    response: Vec<u8>,
    one_shot: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputMode {
    Command,
    ObjectName(usize),
    ObjectContent(usize),
    SmsBody,
}

#[derive(Debug, Default)]
struct Upload {
    active: bool,
    name: Option<String>,
    object_type: Option<String>,
}

struct PhoneState {
    open: bool,
    powered: bool,
    echo: bool,
    pending: VecDeque<Vec<u8>>,
    log: Vec<ChannelEvent>,
    commands: Vec<String>,
    silence: u32,
    write_failures: u32,
    fail_open: bool,
    rules: Vec<ResponseRule>,

    mode: InputMode,
    line: Vec<u8>,
    raw: Vec<u8>,
    upload: Upload,
    sms_recipient: Option<String>,

    elements: BTreeMap<String, StoredElement>,
    next_element: u32,
    alarms: BTreeMap<u32, PhoneAlarm>,
    messages: BTreeMap<u32, StoredMessage>,
    next_message: u32,
    sent: Vec<(String, String)>,
    next_reference: u32,
    text_mode: bool,
    pin: String,
    pin_locked: bool,
    signal: (u8, u8),
    dialed: Vec<String>,
    in_call: bool,
}

impl Default for PhoneState {
    fn default() -> Self {
        Self {
            open: false,
            powered: true,
            echo: true,
            pending: VecDeque::new(),
            log: Vec::new(),
            commands: Vec::new(),
            silence: 0,
            write_failures: 0,
            fail_open: false,
            rules: Vec::new(),
            mode: InputMode::Command,
            line: Vec::new(),
            raw: Vec::new(),
            upload: Upload::default(),
            sms_recipient: None,
            elements: BTreeMap::new(),
            next_element: 10,
            alarms: BTreeMap::new(),
            messages: BTreeMap::new(),
            next_message: 1,
            sent: Vec::new(),
            next_reference: 1,
            text_mode: false,
            pin: "0000".to_string(),
            pin_locked: false,
            signal: (17, 99),
            dialed: Vec::new(),
            in_call: false,
        }
    }
}

struct Shared {
    state: Mutex<PhoneState>,
    data_ready: Condvar,
}

/// In-memory handset
#[derive(Clone)]
pub struct VirtualPhone {
    shared: Arc<Shared>,
}

impl Default for VirtualPhone {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualPhone {
    /// Powered, unlocked handset with an empty store
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PhoneState::default()),
                data_ready: Condvar::new(),
            }),
        }
    }

    /// Handset preloaded with a picture, a ringtone, a contact, two
    /// messages and an alarm
    pub fn with_sample_content() -> Self {
        let phone = Self::new();
        phone.add_element("PICTURES", "JPEG", "Holiday", &sample_jpeg());
        phone.add_element("PICTURES", "JPEG", "Wallpaper", &sample_jpeg());
        phone.add_hidden_element("PICTURES", "FBMP", "operator logo", b"BM\x00\x00");
        phone.add_element("SOUNDS", "MIDI", "Ring one", b"MThd\x00\x00\x00\x06\x00\x00\x00\x01\x00\x60");
        phone.add_element(
            "CONTACTS",
            "VCRD",
            "Alice",
            b"BEGIN:VCARD\r\nVERSION:2.1\r\nN:Alice\r\nTEL:+48600100200\r\nEND:VCARD\r\n",
        );
        phone.add_message("REC UNREAD", "+48600100200", "24/01/02,10:11:12+04", "See you at 8");
        phone.add_message("REC READ", "+48600300400", "24/01/01,09:00:00+04", "Happy new year");
        {
            let mut state = phone.shared.state.lock();
            if let Some(alarm) = PhoneAlarm::from_fields(1, None, "07:00:00", Some("1,2,3,4,5")) {
                state.alarms.insert(1, alarm);
            }
        }
        phone
    }

    /// Store an element, returning its id
    pub fn add_element(&self, category: &str, element_type: &str, name: &str, data: &[u8]) -> String {
        self.shared
            .state
            .lock()
            .store_element(category, element_type, name, data, false)
    }

    /// Store an element the listing marks as hidden
    pub fn add_hidden_element(&self, category: &str, element_type: &str, name: &str, data: &[u8]) -> String {
        self.shared
            .state
            .lock()
            .store_element(category, element_type, name, data, true)
    }

    /// Store an SMS, returning its index
    pub fn add_message(&self, status: &str, number: &str, datetime: &str, body: &str) -> u32 {
        let mut state = self.shared.state.lock();
        let id = state.next_message;
        state.next_message += 1;
        state.messages.insert(
            id,
            StoredMessage {
                id,
                status: status.to_string(),
                number: number.to_string(),
                datetime: datetime.to_string(),
                body: body.to_string(),
            },
        );
        id
    }

    /// Lock the SIM behind `pin`
    pub fn require_pin(&self, pin: &str) {
        let mut state = self.shared.state.lock();
        state.pin = pin.to_string();
        state.pin_locked = true;
    }

    /// Signal report returned by `AT+CSQ`
    pub fn set_signal(&self, rssi: u8, ber: u8) {
        self.shared.state.lock().signal = (rssi, ber);
    }

    /// Swallow the next `n` writes without answering
    pub fn silence_next(&self, n: u32) {
        self.shared.state.lock().silence = n;
    }

    /// Fail the next `n` writes with an I/O error
    pub fn fail_writes(&self, n: u32) {
        self.shared.state.lock().write_failures = n;
    }

    /// Make every open attempt fail
    pub fn fail_open(&self, fail: bool) {
        self.shared.state.lock().fail_open = fail;
    }

    /// Answer every command starting with `prefix` with `response`
    pub fn respond_to(&self, prefix: &str, response: &[u8]) {
        self.add_rule(prefix, response, false);
    }

    /// Answer the next command starting with `prefix` with `response`
    pub fn respond_once(&self, prefix: &str, response: &[u8]) {
        self.add_rule(prefix, response, true);
    }

    fn add_rule(&self, prefix: &str, response: &[u8], one_shot: bool) {
        self.shared.state.lock().rules.push(ResponseRule {
            prefix: prefix.to_ascii_uppercase(),
            response: response.to_vec(),
            one_shot,
        });
    }

    /// Queue unsolicited bytes as one read chunk
    pub fn push_incoming(&self, bytes: &[u8]) {
        self.shared.state.lock().pending.push_back(bytes.to_vec());
        self.shared.data_ready.notify_all();
    }

    /// Every channel event so far
    pub fn log(&self) -> Vec<ChannelEvent> {
        self.shared.state.lock().log.clone()
    }

    /// Forget recorded events and commands
    pub fn clear_log(&self) {
        let mut state = self.shared.state.lock();
        state.log.clear();
        state.commands.clear();
    }

    /// Command lines the handset has processed, in order
    pub fn commands(&self) -> Vec<String> {
        self.shared.state.lock().commands.clone()
    }

    /// Stored elements, visible and hidden
    pub fn elements(&self) -> Vec<StoredElement> {
        self.shared.state.lock().elements.values().cloned().collect()
    }

    /// Stored element by name
    pub fn element_named(&self, name: &str) -> Option<StoredElement> {
        self.shared
            .state
            .lock()
            .elements
            .values()
            .find(|e| e.name == name)
            .cloned()
    }

    /// Alarms by index
    pub fn alarms(&self) -> BTreeMap<u32, PhoneAlarm> {
        self.shared.state.lock().alarms.clone()
    }

    /// Stored messages
    pub fn messages(&self) -> Vec<StoredMessage> {
        self.shared.state.lock().messages.values().cloned().collect()
    }

    /// Messages sent with `AT+CMGS` as (recipient, body)
    pub fn sent_messages(&self) -> Vec<(String, String)> {
        self.shared.state.lock().sent.clone()
    }

    /// Numbers dialed for voice calls
    pub fn dialed(&self) -> Vec<String> {
        self.shared.state.lock().dialed.clone()
    }

    /// A voice call is up
    pub fn in_call(&self) -> bool {
        self.shared.state.lock().in_call
    }

    /// The handset hasn't been switched off
    pub fn is_powered(&self) -> bool {
        self.shared.state.lock().powered
    }

    /// The SIM still waits for a PIN
    pub fn pin_locked(&self) -> bool {
        self.shared.state.lock().pin_locked
    }
}

impl SerialChannel for VirtualPhone {
    fn open(&mut self, config: &PortConfig) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock();
        if state.fail_open {
            return Err(TransportError::PortNotFound(config.port.clone()));
        }
        state.open = true;
        state.pending.clear();
        state.reset_input();
        state.log.push(ChannelEvent::Open);
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.shared.state.lock();
        if state.open {
            state.open = false;
            state.pending.clear();
            state.log.push(ChannelEvent::Close);
        }
    }

    fn is_open(&self) -> bool {
        self.shared.state.lock().open
    }

    fn bytes_available(&mut self) -> Result<usize, TransportError> {
        let state = self.shared.state.lock();
        if !state.open {
            return Err(TransportError::NotConnected);
        }
        Ok(state.pending.front().map_or(0, Vec::len))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut state = self.shared.state.lock();
        if !state.open {
            return Err(TransportError::NotConnected);
        }
        let Some(mut chunk) = state.pending.pop_front() else {
            return Ok(0);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            state.pending.push_front(chunk.split_off(n));
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock();
        if !state.open {
            return Err(TransportError::NotConnected);
        }
        if state.write_failures > 0 {
            state.write_failures -= 1;
            return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "simulated write failure").into());
        }

        state.log.push(ChannelEvent::Write(data.to_vec()));
        if state.silence > 0 {
            state.silence -= 1;
            return Ok(());
        }
        if state.powered {
            state.receive(data);
        }

        let ready = !state.pending.is_empty();
        drop(state);
        if ready {
            self.shared.data_ready.notify_all();
        }
        Ok(())
    }

    fn wait_for_data(&mut self, timeout: Duration) -> bool {
        let mut state = self.shared.state.lock();
        if !state.pending.is_empty() {
            return true;
        }
        self.shared.data_ready.wait_for(&mut state, timeout);
        !state.pending.is_empty()
    }
}

impl PhoneState {
    fn reset_input(&mut self) {
        self.mode = InputMode::Command;
        self.line.clear();
        self.raw.clear();
    }

    fn store_element(&mut self, category: &str, element_type: &str, name: &str, data: &[u8], hidden: bool) -> String {
        let id = format!("{:04}", self.next_element);
        self.next_element += 1;
        self.elements.insert(
            id.clone(),
            StoredElement {
                id: id.clone(),
                category: category.to_string(),
                element_type: element_type.to_string(),
                name: name.to_string(),
                data: data.to_vec(),
                hidden,
            },
        );
        id
    }

    fn queue(&mut self, bytes: Vec<u8>) {
        if !bytes.is_empty() {
            self.pending.push_back(bytes);
        }
    }

    fn receive(&mut self, data: &[u8]) {
        for &byte in data {
            match self.mode {
                InputMode::Command => match byte {
                    b'\r' => {
                        let line = std::mem::take(&mut self.line);
                        self.command(&latin1_to_string(&line));
                    }
                    b'\n' => {}
                    _ => self.line.push(byte),
                },
                InputMode::ObjectName(len) => {
                    self.raw.push(byte);
                    if self.raw.len() == len {
                        self.upload.name = Some(latin1_to_string(&std::mem::take(&mut self.raw)));
                        self.mode = InputMode::Command;
                        self.queue(ok());
                    }
                }
                InputMode::ObjectContent(len) => {
                    self.raw.push(byte);
                    if self.raw.len() == len {
                        let data = std::mem::take(&mut self.raw);
                        self.finish_upload(&data);
                        self.mode = InputMode::Command;
                        self.queue(ok());
                    }
                }
                InputMode::SmsBody => match byte {
                    CTRL_Z => self.finish_sms(),
                    ESC => {
                        self.raw.clear();
                        self.sms_recipient = None;
                        self.mode = InputMode::Command;
                        self.queue(ok());
                    }
                    _ => self.raw.push(byte),
                },
            }
        }
    }

    fn command(&mut self, line: &str) {
        let command = line.trim();
        if command.is_empty() {
            return;
        }
        self.commands.push(command.to_string());
        if self.echo {
            let mut echo = string_to_latin1(command);
            echo.push(b'\r');
            self.queue(echo);
        }

        let upper = command.to_ascii_uppercase();
        if let Some(index) = self.rules.iter().position(|r| upper.starts_with(&r.prefix)) {
            let rule = if self.rules[index].one_shot {
                self.rules.remove(index)
            } else {
                self.rules[index].clone()
            };
            self.queue(rule.response);
            return;
        }

        let reply = self.handle(command, &upper);
        self.queue(reply);
    }

    fn handle(&mut self, command: &str, upper: &str) -> Vec<u8> {
        let arg = |prefix: &str| argument(command, upper, prefix);

        match upper {
            "AT" | "ATZ" | "ATE1" => {
                self.echo = true;
                return ok();
            }
            "ATE0" => {
                self.echo = false;
                return ok();
            }
            "AT+KPSV" => return lines(&["+KPSV: \"VP-1.0.0\"".to_string()]),
            "ATIMEI" => return lines(&["VirtualPhone".to_string()]),
            "AT+CGMR" => return lines(&["VP-1.0.0 rev 7".to_string()]),
            "AT+CGSN" => return lines(&["351234567890123".to_string()]),
            "AT+CNUM" => return lines(&["+CNUM: \"Me\",\"+48600999888\",145".to_string()]),
            "AT*PSCPOF" => {
                self.powered = false;
                return ok();
            }
            "AT+CPIN?" => {
                let status = if self.pin_locked { "SIM PIN" } else { "READY" };
                return lines(&[format!("+CPIN: {status}")]);
            }
            "AT+CALA=?" => {
                return lines(&[format!(
                    "+CALA: ({}-{}),(0),(15)",
                    ALARM_SLOTS.start(),
                    ALARM_SLOTS.end()
                )])
            }
            "AT+CALA?" => {
                let alarms: Vec<String> = self
                    .alarms
                    .values()
                    .map(|a| format!("+CALA: {}", a.to_wire()))
                    .collect();
                return lines(&alarms);
            }
            "AT+CSQ" => return lines(&[format!("+CSQ: {},{}", self.signal.0, self.signal.1)]),
            "ATH" => {
                self.in_call = false;
                return ok();
            }
            _ => {}
        }

        if upper.starts_with("AT+CSCS=") {
            ok()
        } else if let Some(a) = arg("AT+KPSL=") {
            self.list_elements(a)
        } else if let Some(a) = arg("AT+KPSR=") {
            match self.elements.get(unquote(a)) {
                Some(element) => envelope(&element.data),
                None => error(),
            }
        } else if let Some(a) = arg("AT+KPSD=") {
            match self.elements.remove(unquote(a)) {
                Some(_) => ok(),
                None => error(),
            }
        } else if let Some(a) = arg("AT+KPSCAP=") {
            envelope(format!("+KPSCAP: \"{}\",65536", unquote(a)).as_bytes())
        } else if let Some(a) = arg("AT+KDOBJ=") {
            self.transfer(a)
        } else if let Some(a) = arg("AT+CPIN=") {
            self.enter_pin(a)
        } else if let Some(a) = arg("AT+CALA=") {
            match PhoneAlarm::parse(a) {
                Some(alarm) if ALARM_SLOTS.contains(&alarm.number) => {
                    self.alarms.insert(alarm.number, alarm);
                    ok()
                }
                _ => error(),
            }
        } else if let Some(a) = arg("AT+CALD=") {
            match a.parse::<u32>().ok().and_then(|n| self.alarms.remove(&n)) {
                Some(_) => ok(),
                None => error(),
            }
        } else if let Some(a) = arg("AT+CMGF=") {
            match a {
                "0" | "1" => {
                    self.text_mode = a == "1";
                    ok()
                }
                _ => error(),
            }
        } else if let Some(a) = arg("AT+CMGL=") {
            self.list_messages(unquote(a))
        } else if let Some(a) = arg("AT+CMGR=") {
            self.read_message(a)
        } else if let Some(a) = arg("AT+CMGS=") {
            if !self.text_mode || unquote(a).is_empty() {
                return error();
            }
            self.sms_recipient = Some(unquote(a).to_string());
            self.raw.clear();
            self.mode = InputMode::SmsBody;
            b"\r\n> ".to_vec()
        } else if let Some(a) = arg("AT+CMGD=") {
            match a.parse::<u32>().ok().and_then(|n| self.messages.remove(&n)) {
                Some(_) => ok(),
                None => b"\r\n+CMS ERROR: 321\r\n".to_vec(),
            }
        } else if let Some(a) = arg("ATDT").or_else(|| arg("ATDP")).or_else(|| arg("ATD")) {
            self.dial(a)
        } else {
            error()
        }
    }

    fn list_elements(&self, arg: &str) -> Vec<u8> {
        let category = unquote(arg.split(',').next().unwrap_or_default());
        let listing: Vec<String> = self
            .elements
            .values()
            .filter(|e| e.category.eq_ignore_ascii_case(category))
            .map(|e| {
                format!(
                    "+KPSL: {},{},{},\"{}\",\"{}\",1,0,\"{}\"",
                    e.id,
                    u8::from(e.hidden),
                    e.data.len(),
                    e.category,
                    e.element_type,
                    e.name
                )
            })
            .collect();
        lines(&listing)
    }

    fn transfer(&mut self, arg: &str) -> Vec<u8> {
        let fields: Vec<&str> = arg.split(',').map(str::trim).collect();
        match fields.as_slice() {
            ["1", "0"] => {
                self.upload = Upload::default();
                ok()
            }
            ["1", "1"] => {
                self.upload = Upload {
                    active: true,
                    ..Upload::default()
                };
                ok()
            }
            ["2", "1", "3", "0", len] if self.upload.active => match len.parse::<usize>() {
                Ok(len) if len > 0 => {
                    self.raw.clear();
                    self.mode = InputMode::ObjectName(len);
                    connect()
                }
                _ => error(),
            },
            ["2", "1", "0", object_type, len] if self.upload.name.is_some() => {
                match len.parse::<usize>() {
                    Ok(len) if len > 0 => {
                        self.upload.object_type = Some(object_type.to_string());
                        self.raw.clear();
                        self.mode = InputMode::ObjectContent(len);
                        connect()
                    }
                    _ => error(),
                }
            }
            _ => error(),
        }
    }

    fn finish_upload(&mut self, data: &[u8]) {
        let name = self.upload.name.take().unwrap_or_default();
        let object_type = self.upload.object_type.take().unwrap_or_default();
        let category = category_for_type(&object_type);
        self.store_element(category, &object_type, &name, data, false);
    }

    fn enter_pin(&mut self, arg: &str) -> Vec<u8> {
        let mut fields = arg.split(',').map(|f| unquote(f.trim()));
        let pin = fields.next().unwrap_or_default();
        let new_pin = fields.next().filter(|p| !p.is_empty());

        if pin != self.pin {
            return b"\r\n+CME ERROR: 16\r\n".to_vec();
        }
        match (self.pin_locked, new_pin) {
            (true, new_pin) => {
                self.pin_locked = false;
                if let Some(new_pin) = new_pin {
                    self.pin = new_pin.to_string();
                }
                ok()
            }
            (false, Some(new_pin)) => {
                self.pin = new_pin.to_string();
                ok()
            }
            (false, None) => b"\r\n+CME ERROR: 3\r\n".to_vec(),
        }
    }

    fn list_messages(&self, filter: &str) -> Vec<u8> {
        if !self.text_mode {
            return error();
        }
        let mut listing = Vec::new();
        for m in self.messages.values() {
            if filter.eq_ignore_ascii_case("ALL") || m.status.eq_ignore_ascii_case(filter) {
                listing.push(format!(
                    "+CMGL: {},\"{}\",\"{}\",,\"{}\"",
                    m.id, m.status, m.number, m.datetime
                ));
                listing.push(m.body.clone());
            }
        }
        lines(&listing)
    }

    fn read_message(&mut self, arg: &str) -> Vec<u8> {
        if !self.text_mode {
            return error();
        }
        let Some(message) = arg.parse::<u32>().ok().and_then(|n| self.messages.get_mut(&n)) else {
            return b"\r\n+CMS ERROR: 321\r\n".to_vec();
        };
        let reply = lines(&[
            format!(
                "+CMGR: \"{}\",\"{}\",,\"{}\"",
                message.status, message.number, message.datetime
            ),
            message.body.clone(),
        ]);
        if message.status == "REC UNREAD" {
            message.status = "REC READ".to_string();
        }
        reply
    }

    fn finish_sms(&mut self) {
        let body = latin1_to_string(&std::mem::take(&mut self.raw));
        let recipient = self.sms_recipient.take().unwrap_or_default();
        self.sent.push((recipient, body));
        self.mode = InputMode::Command;

        let reference = self.next_reference;
        self.next_reference = (self.next_reference + 1) % 256;
        self.queue(lines(&[format!("+CMGS: {reference}")]));
    }

    fn dial(&mut self, arg: &str) -> Vec<u8> {
        let (number, voice) = match arg.strip_suffix(';') {
            Some(number) => (number.trim(), true),
            None => (arg, false),
        };
        if number.is_empty() {
            return error();
        }
        if !voice {
            return b"\r\nNO CARRIER\r\n".to_vec();
        }
        self.dialed.push(number.to_string());
        self.in_call = true;
        ok()
    }
}

fn category_for_type(object_type: &str) -> &'static str {
    match object_type.to_ascii_uppercase().as_str() {
        "JPEG" | "GIF" | "PNG" | "BMP" | "WBMP" => "PICTURES",
        "MIDI" | "AMR" | "WAV" | "IMY" | "MP3" | "AAC" => "SOUNDS",
        "VCRD" => "CONTACTS",
        "VCAL" => "CALENDAR",
        "JAVA" | "JAD" => "APPLICATIONS",
        _ => "OTHER",
    }
}

/// Arguments of `command` when its uppercased form starts with `prefix`
fn argument<'a>(command: &'a str, upper: &str, prefix: &str) -> Option<&'a str> {
    if upper.starts_with(prefix) {
        command.get(prefix.len()..).map(str::trim)
    } else {
        None
    }
}

fn unquote(text: &str) -> &str {
    text.trim().trim_matches('"')
}

fn ok() -> Vec<u8> {
    b"\r\nOK\r\n".to_vec()
}

fn error() -> Vec<u8> {
    b"\r\nERROR\r\n".to_vec()
}

fn connect() -> Vec<u8> {
    b"\r\nCONNECT\r\n".to_vec()
}

fn lines(body: &[String]) -> Vec<u8> {
    let mut reply = b"\r\n".to_vec();
    for line in body {
        reply.extend_from_slice(&string_to_latin1(line));
        reply.extend_from_slice(b"\r\n");
    }
    reply.extend_from_slice(b"\r\nOK\r\n");
    reply
}

fn envelope(payload: &[u8]) -> Vec<u8> {
    let mut reply = b"\r\nCONNECT\r\n".to_vec();
    reply.extend_from_slice(payload);
    reply.extend_from_slice(b"\r\nNO CARRIER\r\n");
    reply
}

/// Smallest byte string the frame extractor recognises as a JPEG
pub fn sample_jpeg() -> Vec<u8> {
    let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
    jpeg.extend_from_slice(b"JFIF\x00\x01\x01\x00\x00\x01\x00\x01\x00\x00");
    jpeg.extend_from_slice(&[0xFF, 0xD9]);
    jpeg
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_phone() -> VirtualPhone {
        let mut phone = VirtualPhone::new();
        phone.open(&PortConfig::new("virtual", 115_200)).unwrap();
        phone
    }

    fn drain(phone: &mut VirtualPhone) -> String {
        let mut out = Vec::new();
        let mut buf = [0u8; 256];
        while phone.bytes_available().unwrap() > 0 {
            let n = phone.read(&mut buf).unwrap();
            out.extend_from_slice(&buf[..n]);
        }
        latin1_to_string(&out)
    }

    #[test]
    fn test_echo_and_ok() {
        let mut phone = open_phone();
        phone.write(b"AT\r").unwrap();
        assert_eq!(phone.bytes_available().unwrap(), 3);
        assert_eq!(drain(&mut phone), "AT\r\r\nOK\r\n");
    }

    #[test]
    fn test_unknown_command() {
        let mut phone = open_phone();
        phone.write(b"AT+FOO\r").unwrap();
        assert!(drain(&mut phone).ends_with("ERROR\r\n"));
    }

    #[test]
    fn test_command_split_across_writes() {
        let mut phone = open_phone();
        phone.write(b"AT+C").unwrap();
        assert_eq!(phone.bytes_available().unwrap(), 0);
        phone.write(b"SQ\r").unwrap();
        assert!(drain(&mut phone).contains("+CSQ: 17,99"));
        assert_eq!(phone.commands(), vec!["AT+CSQ".to_string()]);
    }

    #[test]
    fn test_records_events() {
        let mut phone = open_phone();
        phone.write(b"AT\r").unwrap();
        phone.close();
        phone.close();
        assert_eq!(
            phone.log(),
            vec![
                ChannelEvent::Open,
                ChannelEvent::Write(b"AT\r".to_vec()),
                ChannelEvent::Close
            ]
        );
        assert!(phone.write(b"AT\r").is_err());
    }

    #[test]
    fn test_rules_override_model() {
        let mut phone = open_phone();
        phone.respond_once("AT+CSQ", b"\r\nERROR\r\n");
        phone.write(b"AT+CSQ\r").unwrap();
        assert!(drain(&mut phone).contains("ERROR"));
        phone.write(b"AT+CSQ\r").unwrap();
        assert!(drain(&mut phone).contains("+CSQ:"));
    }

    #[test]
    fn test_read_splits_chunk() {
        let mut phone = open_phone();
        phone.push_incoming(b"abcdef");
        let mut buf = [0u8; 4];
        assert_eq!(phone.read(&mut buf).unwrap(), 4);
        assert_eq!(phone.bytes_available().unwrap(), 2);
    }

    #[test]
    fn test_wait_for_data_times_out() {
        let mut phone = open_phone();
        assert!(!phone.wait_for_data(Duration::from_millis(5)));
        phone.push_incoming(b"x");
        assert!(phone.wait_for_data(Duration::from_millis(5)));
    }

    #[test]
    fn test_power_off_goes_silent() {
        let mut phone = open_phone();
        phone.write(b"AT*PSCPOF\r").unwrap();
        assert!(drain(&mut phone).contains("OK"));
        phone.write(b"AT\r").unwrap();
        assert_eq!(phone.bytes_available().unwrap(), 0);
        assert!(!phone.is_powered());
    }

    #[test]
    fn test_sms_body_until_ctrl_z() {
        let mut phone = open_phone();
        phone.write(b"AT+CMGF=1\r").unwrap();
        drain(&mut phone);
        phone.write(b"AT+CMGS=\"+4811\"\r").unwrap();
        assert!(drain(&mut phone).ends_with("> "));
        phone.write(b"Hi there\x1A").unwrap();
        assert!(drain(&mut phone).contains("+CMGS: 1"));
        assert_eq!(
            phone.sent_messages(),
            vec![("+4811".to_string(), "Hi there".to_string())]
        );
    }
}
