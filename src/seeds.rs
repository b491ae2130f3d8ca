//! Built-in curriculum so the service is useful without a config file.
//!
//! A `[[levels]]` table in the TOML config replaces all of this.

use crate::domain::{Difficulty, Level, Task, TestCase};

struct Seed {
  id: &'static str,
  title: &'static str,
  title_ar: &'static str,
  description: &'static str,
  description_ar: &'static str,
  difficulty: Difficulty,
  xp: u32,
  starter_code: &'static str,
  expected_output: Option<&'static str>,
  hints: &'static [&'static str],
  hints_ar: &'static [&'static str],
}

fn task(level_id: &str, s: Seed) -> Task {
  let test_cases = s
    .expected_output
    .map(|out| vec![TestCase {
      input: None,
      expected_output: out.to_string(),
      description: format!("Should print {}", out.replace('\n', " ")),
      description_ar: format!("يجب أن يطبع {}", out.replace('\n', " ")),
    }])
    .unwrap_or_default();
  Task {
    id: s.id.into(),
    level_id: level_id.into(),
    title: s.title.into(),
    title_ar: s.title_ar.into(),
    description: s.description.into(),
    description_ar: s.description_ar.into(),
    difficulty: s.difficulty,
    xp: s.xp,
    starter_code: s.starter_code.into(),
    expected_output: s.expected_output.map(String::from),
    test_cases,
    hints: s.hints.iter().map(|h| h.to_string()).collect(),
    hints_ar: s.hints_ar.iter().map(|h| h.to_string()).collect(),
  }
}

/// Three introductory Python levels.
pub fn seed_levels() -> Vec<Level> {
  vec![
    Level {
      id: "level-1".into(),
      order: 1,
      title: "Python Foundations".into(),
      title_ar: "أساسيات بايثون".into(),
      description: "Begin your coding journey! Learn the fundamentals that every programmer needs.".into(),
      description_ar: "ابدأ رحلتك البرمجية! تعلم الأساسيات التي يحتاجها كل مبرمج.".into(),
      xp: 100,
      prerequisites: vec![],
      tasks: vec![
        task("level-1", Seed {
          id: "task-1-1",
          title: "Hello World",
          title_ar: "مرحباً بالعالم",
          description: "Write your first Python program! Use the print() function to display \"Hello, World!\".",
          description_ar: "اكتب أول برنامج بايثون لك! اطبع \"Hello, World!\" في وحدة التحكم.",
          difficulty: Difficulty::Beginner,
          xp: 10,
          starter_code: "# Your mission: Print \"Hello, World!\" to the console\n# Hint: Use the print() function\n\n",
          expected_output: Some("Hello, World!"),
          hints: &["Use the print() function", "Put your text inside quotes \" \""],
          hints_ar: &["استخدم دالة print()", "ضع النص داخل علامات اقتباس \" \""],
        }),
        task("level-1", Seed {
          id: "task-1-2",
          title: "Variables: Your Data Containers",
          title_ar: "المتغيرات: حاويات البيانات",
          description: "Create a variable called `name` with your name, then print it.",
          description_ar: "أنشئ متغيراً يسمى \"name\" باسمك واطبعه.",
          difficulty: Difficulty::Beginner,
          xp: 15,
          starter_code: "# Create a variable called \"name\" with your name\n# Then print it using print()\n\n",
          expected_output: None,
          hints: &["name = \"Your Name\"", "Then call print(name)"],
          hints_ar: &["name = \"اسمك\"", "ثم استدعِ print(name)"],
        }),
        task("level-1", Seed {
          id: "task-1-3",
          title: "String Magic",
          title_ar: "سحر النصوص",
          description: "Combine the first and last name variables with a space between them and print the full name.",
          description_ar: "ادمج متغيرين بالاسم الأول والأخير، ثم اطبعهما معاً.",
          difficulty: Difficulty::Beginner,
          xp: 20,
          starter_code: "first = \"John\"\nlast = \"Doe\"\n\n# Combine them and print the full name\n",
          expected_output: Some("John Doe"),
          hints: &["Use + to join strings", "Don't forget the space: first + \" \" + last"],
          hints_ar: &["استخدم + لدمج النصوص", "لا تنسَ المسافة: first + \" \" + last"],
        }),
        task("level-1", Seed {
          id: "task-1-4",
          title: "Math Time!",
          title_ar: "وقت الرياضيات!",
          description: "Calculate the sum of 15 and 27, then print the result.",
          description_ar: "احسب مجموع 15 و27، ثم اطبع النتيجة.",
          difficulty: Difficulty::Beginner,
          xp: 15,
          starter_code: "# Calculate the sum of 15 and 27\n# Print the result\n\n",
          expected_output: Some("42"),
          hints: &["Use the + operator", "print(15 + 27)"],
          hints_ar: &["استخدم عامل +", "print(15 + 27)"],
        }),
      ],
    },
    Level {
      id: "level-2".into(),
      order: 2,
      title: "Control Flow".into(),
      title_ar: "تدفق التحكم".into(),
      description: "Make decisions in your code! Learn if statements and loops.".into(),
      description_ar: "اتخذ قرارات في كودك! تعلم عبارات if والحلقات.".into(),
      xp: 200,
      prerequisites: vec!["level-1".into()],
      tasks: vec![
        task("level-2", Seed {
          id: "task-2-1",
          title: "If Statements: Making Decisions",
          title_ar: "عبارة If: اتخاذ القرارات",
          description: "Write an if statement that checks whether the number is positive and prints \"Positive\".",
          description_ar: "اكتب عبارة if تتحقق إذا كان الرقم موجباً وتطبع \"Positive\"",
          difficulty: Difficulty::Beginner,
          xp: 25,
          starter_code: "number = 5\n\n# If number is positive, print \"Positive\"\n",
          expected_output: Some("Positive"),
          hints: &["if number > 0:", "Indent the print() under the if"],
          hints_ar: &["if number > 0:", "ضع print() بمسافة بادئة تحت if"],
        }),
        task("level-2", Seed {
          id: "task-2-2",
          title: "Even or Odd?",
          title_ar: "زوجي أم فردي؟",
          description: "Check if 7 is even or odd, and print the result.",
          description_ar: "تحقق إذا كان الرقم زوجياً أم فردياً واطبع النتيجة.",
          difficulty: Difficulty::Intermediate,
          xp: 30,
          starter_code: "number = 7\n\n# Check if even or odd\n",
          expected_output: None,
          hints: &["if number % 2 == 0: means even", "Use else for odd"],
          hints_ar: &["if number % 2 == 0: يعني زوجي", "استخدم else للفردي"],
        }),
        task("level-2", Seed {
          id: "task-2-3",
          title: "For Loops: Repeat After Me!",
          title_ar: "حلقة For: كرر ورائي!",
          description: "Use a for loop to print the numbers from 1 to 5, one per line.",
          description_ar: "استخدم حلقة for لطباعة الأرقام من 1 إلى 5.",
          difficulty: Difficulty::Intermediate,
          xp: 35,
          starter_code: "# Print the numbers 1 to 5 using a for loop\n",
          expected_output: Some("1\n2\n3\n4\n5"),
          hints: &["range(1, 6) gives 1..5", "for i in range(1, 6):"],
          hints_ar: &["range(1, 6) تعطي من 1 إلى 5", "for i in range(1, 6):"],
        }),
        task("level-2", Seed {
          id: "task-2-4",
          title: "While Loops: Until We're Done!",
          title_ar: "حلقة While: حتى ننتهي!",
          description: "Use a while loop to count down from 5 to 1.",
          description_ar: "استخدم حلقة while للعد التنازلي من 5 إلى 1.",
          difficulty: Difficulty::Intermediate,
          xp: 40,
          starter_code: "count = 5\n\n# Count down to 1 with a while loop\n",
          expected_output: Some("5\n4\n3\n2\n1"),
          hints: &["while count > 0:", "Decrease count by 1 each time: count -= 1"],
          hints_ar: &["while count > 0:", "أنقص count بمقدار 1 في كل مرة: count -= 1"],
        }),
      ],
    },
    Level {
      id: "level-3".into(),
      order: 3,
      title: "Data Structures".into(),
      title_ar: "هياكل البيانات".into(),
      description: "Organize your data like a pro! Lists, dictionaries and more.".into(),
      description_ar: "نظم بياناتك كالمحترفين! القوائم والقواميس والمزيد.".into(),
      xp: 300,
      prerequisites: vec!["level-2".into()],
      tasks: vec![
        task("level-3", Seed {
          id: "task-3-1",
          title: "Lists: Your Shopping Cart",
          title_ar: "القوائم: سلة التسوق",
          description: "Create a list with 3 fruits and print the second one.",
          description_ar: "أنشئ قائمة بـ 3 فواكه واطبع الثانية.",
          difficulty: Difficulty::Beginner,
          xp: 30,
          starter_code: "# Create a list of 3 fruits\n# Print the second fruit\n",
          expected_output: None,
          hints: &["fruits = [\"apple\", \"banana\", \"cherry\"]", "Indexes start at 0, so the second is fruits[1]"],
          hints_ar: &["fruits = [\"apple\", \"banana\", \"cherry\"]", "الفهارس تبدأ من 0، لذا الثاني هو fruits[1]"],
        }),
        task("level-3", Seed {
          id: "task-3-2",
          title: "Dictionaries: Your Contact Book",
          title_ar: "القواميس: دفتر العناوين",
          description: "Create a dictionary with the keys \"name\" and \"age\" and print it.",
          description_ar: "أنشئ قاموساً بمفاتيح \"name\" و \"age\".",
          difficulty: Difficulty::Intermediate,
          xp: 40,
          starter_code: "# Create a dictionary with name and age\n",
          expected_output: None,
          hints: &["person = {\"name\": \"Sara\", \"age\": 20}", "Access a value with person[\"name\"]"],
          hints_ar: &["person = {\"name\": \"Sara\", \"age\": 20}", "للوصول إلى قيمة استخدم person[\"name\"]"],
        }),
      ],
    },
  ]
}
