//! Scripted reply texts. Every AI-assisted call site falls back to one of
//! these, so the engine stays fully functional with no model configured.

use crate::verify::ReceiptExtraction;

pub const GREETING: &str = "*¡Buen día, veci! 😊*\n\
¿Qué deseas hoy?\n\n\
Haz tu pedido aquí 👇🏻\n\
🌐 https://cocina-casera.web.app/\n\n\
*⏰ Horarios de atención:*\n\
Desayuno: 7:00 a. m. – 11:00 a. m.\n\
Almuerzo: 11:00 a. m. – 3:55 p. m.\n\n\
Gracias por tu apoyo 💛\n\
*Cocina Casera — siempre contigo.*";

pub const WEB_ORDER_CONFIRMATION: &str = "👋 ¡Hola veci!\n\
Tu pedido hecho en la página *ya fue recibido* y está en preparación. 🍽️🔥\n\n\
Pronto uno de nuestros domiciliarios te enviará un mensaje apenas salga.\n\n\
📲 Si vas a pagar por transferencia, envía la captura del comprobante *solo por este chat*.\n\n\
¡Gracias por pedir en Cocina Casera! 💛";

pub const EXPLANATION: &str = "*Veci, parece que aún no estás siguiendo la dinámica 😊*\n\
Te explico de nuevo:\n\n\
*👉 Mira el video que te envié* o este también es otro de apoyo.\n\
*🔗 Haz clic en el link* para hacer tu pedido directamente desde la página.\n\
https://cocina-casera.web.app/\n\n\
Ahí eliges todo rapidito y sin complicarte.\n\
Estoy pendiente 💛";

pub const DUPLICATE_ORDER_TUTORIAL: &str = "*Veci, veo que ya hiciste un pedido hace un momento 😊*\n\n\
Si quieres hacer *más pedidos*, no es necesario enviar uno por uno. \
Y si te pasó por alto, no te preocupes.\n\n\
*👉 Mira este video* que te explica cómo duplicar y hacer varios pedidos juntos de forma más rápida.\n\n\
¡Es muy fácil! 💛";

pub const MULTIPLE_ORDERS_TUTORIAL: &str = "*¡Hola, veci! 👋😊*\n\
Te comparto este video para que veas cómo pedir varios almuerzos o desayunos en un solo envío por WhatsApp, sin salir de la página ni repetir el proceso.\n\n\
Haz tu pedido aquí 👇\n\
🌐 https://cocina-casera.web.app/\n\n\
⏰ *Horarios de atención:*\n\
Desayuno: 7:00 a. m. – 11:00 a. m.\n\
Almuerzo: 11:00 a. m. – 3:55 p. m.\n\n\
Gracias por preferirnos 💛\n\
Cocina Casera — sabor y facilidad en un mismo lugar 🍽️✨";

pub const TROUBLESHOOT_SENDING: &str = "¿No te deja enviar tu pedido por WhatsApp? 😊\n\
Mira este video rápido y soluciona el problema en segundos.\n\n\
Haz tu pedido aquí 👇🏻\n\
🌐 https://cocina-casera.web.app/\n\n\
⏰ *Horarios de atención:*\n\
Desayuno: 7:00 a. m. – 11:00 a. m.\n\
Almuerzo: 11:00 a. m. – 3:55 p. m.\n\n\
Cocina Casera — siempre contigo 💛";

pub const ASSISTANCE_OPTIONS: &str = "*¡Hola! ¿En qué puedo ayudarte hoy? 😊*\n\
Selecciona una opción:\n\n\
*1️⃣ Ayuda humana*\n\
*2️⃣ No me deja enviar el pedido*\n\
*3️⃣ Cómo hago más pedidos*\n\
*4️⃣ ¿Sí llegan a mi dirección?*\n\
*5️⃣ Quiero hacer un pedido*";

pub const TROUBLE_ASSISTANCE_OPTIONS: &str = "*Veo que sigues con inconvenientes, veci 😊*\n\
Elige una de estas opciones para ayudarte:\n\n\
*1️⃣ Ayuda humana*\n\
*2️⃣ No me deja enviar el pedido*\n\
*3️⃣ Cómo hago más pedidos*\n\
*4️⃣ ¿Sí llegan a mi dirección?*\n\
*5️⃣ Quiero hacer un pedido*";

pub const OPTION_HELP: &str = "*Para seleccionar una opción, veci 😊*\n\n\
Solo escribe el *número* de la opción que necesitas.\n\
Por ejemplo: *1*, *2*, *3*, *4* o *5*\n\n\
También puedes escribir el número en letra, como:\n\
• *uno* → para opción 1\n\
• *dos* → para opción 2\n\
Y así sucesivamente 💛\n\n\
¿Cuál opción necesitas?";

pub const HUMAN_HELP_ACK: &str = "*Ya casi, veci 😊*\n\
En un momento alguien te escribirá.\n\
Gracias por tu paciencia 💛\n\n\
⏱️ *Tiempo de espera: máximo 5 a 10 minutos.*\n\
Si no recibes respuesta en ese tiempo, te lo haremos saber.";

pub const STILL_TRYING: &str = "*Seguimos intentando, veci 💛*\n\
Aún no hay nadie del equipo disponible por chat.\n\
Gracias por tu paciencia, en unos minutos te contamos cómo vamos 😊";

pub const HELP_TIMEOUT_APOLOGY: &str = "*Veci, qué pena contigo 🙏💛*\n\
En este momento hay *muchos pedidos* y nadie del equipo puede responder por chat.\n\n\
Pero no te preocupes: elige una opción y te ayudamos de una vez 😊";

pub const FALLBACK_MENU: &str = "*¿Cómo prefieres continuar?*\n\n\
*1️⃣ Esperar un poco más*\n\
*2️⃣ Resolverlo con las opciones automáticas*\n\
*3️⃣ Dejar un número para que te llamemos*";

pub const KEEP_WAITING_ACK: &str = "*Perfecto, veci 💛*\n\
Seguiremos intentando comunicarte con alguien del equipo.\n\
Te avisaremos cuando estén disponibles.";

pub const AUTOMATED_OPTIONS_ACK: &str = "*¡Perfecto! Te muestro las opciones automáticas 😊*";

pub const CALLBACK_PROMPT: &str = "*Entendido, veci 💛*\n\n\
Déjanos tu número de contacto y te llamaremos o escribiremos lo más pronto posible.\n\n\
*Escribe tu número aquí* (ej: 3001234567)";

pub const CALLBACK_INVALID: &str = "*Por favor, escribe un número de teléfono válido* 📱\n\n\
Ejemplo: 3001234567";

pub const COVERAGE_ANSWER: &str = "*Para confirmar si llegamos a tu dirección 🛵💛*\n\
Solo debes hacer el pedido desde la página.\n\
Si el sistema te deja *confirmar la dirección,* significa que *sí te podemos atender.*";

pub const MENU_NUDGE: &str = "¿Aún no sabes qué pedir, veci? 😊\n\n\
Tranquilo, tómate tu tiempo. Aquí sigo para ayudarte con lo que necesites 💛";

pub const MENU_NUDGE_OPTIONS: &str = "*¿En qué puedo ayudarte?*\n\n\
*1️⃣ Ayuda humana*\n\
*2️⃣ No me deja enviar el pedido*\n\
*3️⃣ Cómo hago más pedidos*\n\
*4️⃣ ¿Sí llegan a mi dirección?*\n\
*5️⃣ Quiero hacer un pedido*";

pub const FAREWELL: &str = "¡Con mucho gusto, veci! 💛\n\n\
Cuando necesites algo más, aquí estaré. ¡Que tengas un excelente día! 😊";

pub const PAYMENT_REMINDER: &str = "Por favor, comparte el comprobante de pago 📲💳";

pub const LONG_WAIT_REMINDER: &str = "Veci, aún estoy esperando el comprobante de pago 📲💳\n\n\
Cuando puedas, envíalo por aquí 😊";

pub const RECEIPT_RECEIVED_MANUAL: &str = "Comprobante recibido. ¡Muchas gracias, veci! 💛";

pub const SEND_FAILURE_APOLOGY: &str = "Hubo un error al procesar tu mensaje. Intenta de nuevo.";

const PAYMENT_INTENT_ACKS: &[&str] = &[
    "Perfecto veci, toma tu tiempo 💛\nAquí estaré pendiente del comprobante 📲",
    "Dale veci, tranquilo 😊\nTe espero con el comprobante 💛",
    "Perfecto, aquí espero 📲💛",
    "Dale veci, sin afán 💛\nEnvía el comprobante cuando puedas 📸",
];

/// Acknowledgment for a "paying shortly" notice, rotated deterministically
/// by how many times the user has already asked for time.
pub fn payment_intent_ack(pause_count: u32) -> &'static str {
    PAYMENT_INTENT_ACKS[pause_count as usize % PAYMENT_INTENT_ACKS.len()]
}

fn extracted_lines(extraction: &ReceiptExtraction, expected_amount: u64) -> String {
    let mut out = String::new();
    if let Some(amount) = extraction.amount {
        out.push_str(&format!("• Monto: ${amount}"));
        if amount != expected_amount {
            out.push_str(&format!(" ⚠️ (esperado: ${expected_amount})"));
        }
        out.push('\n');
    }
    if let Some(date) = extraction.date {
        out.push_str(&format!("• Fecha: {}\n", date.format("%d/%m/%Y")));
    }
    if let Some(bank) = &extraction.bank {
        out.push_str(&format!("• Método: {bank}\n"));
    }
    out
}

pub fn verified_receipt(extraction: &ReceiptExtraction) -> String {
    let mut response = format!(
        "*¡Comprobante verificado! ✅*\n\nMonto: ${}\nFecha: {}\nMétodo: {}",
        extraction.amount.unwrap_or_default(),
        extraction
            .date
            .map(|d| d.format("%d/%m/%Y").to_string())
            .unwrap_or_default(),
        extraction.bank.as_deref().unwrap_or("Transferencia"),
    );
    if !extraction.warnings.is_empty() {
        response.push_str(&format!("\n\n📝 *Nota:* {}", extraction.warnings.join(", ")));
    }
    response.push_str("\n\n¡Muchas gracias, veci! Tu pago ha sido confirmado. 💛");
    response
}

/// Screenshot taken before the user confirmed the transfer in their bank
/// app: amount is there but no date was stamped yet.
pub fn transfer_not_finalized() -> String {
    "*⚠️ Esperando confirmación de pago* 📲\n\n\
Veo que la transferencia aún no se ha completado.\n\n\
*Por favor:*\n\
1️⃣ Dale *\"Enviar\"* en la app de tu banco\n\
2️⃣ Espera la confirmación\n\
3️⃣ Envía el comprobante final con la fecha\n\n\
Te estaré esperando, veci 💛"
        .to_string()
}

pub fn transfer_still_not_finalized() -> String {
    "*⚠️ Aún falta la fecha* 📅\n\n\
Por favor, asegúrate de:\n\
• Dar *\"Enviar\"* en tu app bancaria\n\
• Esperar la confirmación\n\
• Enviar la captura completa con la fecha visible\n\n\
Te estaré esperando, veci 💛"
        .to_string()
}

pub fn manual_review(extraction: &ReceiptExtraction, expected_amount: u64) -> String {
    let mut response = String::from("*Imagen recibida* 📸\n\nEstamos revisando tu comprobante.\n");
    let lines = extracted_lines(extraction, expected_amount);
    if !lines.is_empty() {
        response.push_str("\n🔍 *Información detectada:*\n");
        response.push_str(&lines);
    }
    response.push_str(&format!(
        "\n⚠️ *Nota:* {}\n\nNuestro equipo lo revisará y te confirmaremos pronto. 💛",
        extraction.reason
    ));
    response
}

pub fn manual_review_generic() -> String {
    "*Comprobante recibido* 📸\n\n\
Estamos revisando tu comprobante.\n\n\
Nuestro equipo te confirmará pronto. 💛"
        .to_string()
}

pub fn cash_switch_verified(extraction: &ReceiptExtraction, method: &str) -> String {
    format!(
        "*¡Perfecto! Comprobante recibido y verificado ✅*\n\n\
Hemos actualizado tu pedido:\n\
• Método de pago: {method}\n\
• Monto: ${}\n\
• Fecha: {}\n\n\
¡Muchas gracias, veci! 💛",
        extraction.amount.unwrap_or_default(),
        extraction
            .date
            .map(|d| d.format("%d/%m/%Y").to_string())
            .unwrap_or_default(),
    )
}

pub fn cash_switch_manual(extraction: &ReceiptExtraction, expected_amount: u64) -> String {
    let mut response = String::from(
        "*Comprobante recibido* 📸\n\nHemos actualizado tu método de pago a transferencia.\n",
    );
    let lines = extracted_lines(extraction, expected_amount);
    if !lines.is_empty() {
        response.push_str("\n🔍 *Información detectada:*\n");
        response.push_str(&lines);
    }
    response.push_str(&format!(
        "\n⚠️ *Nota:* {}\n\nNuestro equipo lo revisará y te confirmaremos pronto. 💛",
        extraction.reason
    ));
    response
}

pub fn cash_switch_generic() -> String {
    "*Comprobante recibido* 📸\n\n\
Hemos actualizado tu pedido de *Efectivo* a *Transferencia*.\n\n\
Estamos revisando tu comprobante y te confirmaremos pronto. 💛"
        .to_string()
}

pub fn callback_registered(number: &str) -> String {
    format!(
        "*Perfecto, veci 💛*\n\n\
Hemos registrado tu número: *{number}*\n\n\
Te contactaremos lo más pronto posible.\n\n\
Gracias por tu paciencia 😊"
    )
}

pub fn callback_operator_notice(user: &str, number: &str) -> String {
    format!(
        "*Solicitud de Callback* 📞\n\n\
Cliente: {user}\n\
Número de contacto: {number}\n\n\
Por favor, contactar lo antes posible."
    )
}

pub fn manual_review_operator_notice(user: &str, reason: &str) -> String {
    format!("*Comprobante en revisión* 📸\n\nCliente: {user}\nMotivo: {reason}")
}
